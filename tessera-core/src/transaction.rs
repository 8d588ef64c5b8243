use serde::{Deserialize, Serialize};
use shared::{Amount, Hash256};
use std::fmt;

use crate::error::DecodeError;
use crate::wire::{self, Cursor};

/// Índice de saída que marca o outpoint nulo da coinbase
pub const NULL_VOUT: u32 = 0xffff_ffff;

/// Número de sequência final
pub const MAX_SEQUENCE: u32 = 0xffff_ffff;

/// Árvore em que uma transação vive dentro do bloco
///
/// A árvore participa da serialização do outpoint e decide em qual merkle
/// root a transação entra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxTree {
    Regular = 0,
    Stake = 1,
}

impl TryFrom<u8> for TxTree {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Regular),
            1 => Ok(Self::Stake),
            other => Err(DecodeError::InvalidValue(format!(
                "unknown transaction tree {other}"
            ))),
        }
    }
}

/// Modos de serialização de uma transação
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum TxSerializeType {
    Full = 0,
    NoWitness = 1,
    OnlyWitness = 2,
}

impl TryFrom<u16> for TxSerializeType {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Full),
            1 => Ok(Self::NoWitness),
            2 => Ok(Self::OnlyWitness),
            other => Err(DecodeError::InvalidValue(format!(
                "unknown serialize type {other}"
            ))),
        }
    }
}

/// Referência a uma saída de transação
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Hash da transação que contém a saída
    pub txid: Hash256,
    /// Índice da saída na transação
    pub vout: u32,
    /// Árvore da transação referenciada
    pub tree: TxTree,
}

impl OutPoint {
    /// Cria um novo `OutPoint`
    #[must_use]
    pub const fn new(txid: Hash256, vout: u32, tree: TxTree) -> Self {
        Self { txid, vout, tree }
    }

    /// Outpoint nulo usado pela coinbase e pelo stakebase dos votos
    #[must_use]
    pub const fn null() -> Self {
        Self {
            txid: Hash256::zero(),
            vout: NULL_VOUT,
            tree: TxTree::Regular,
        }
    }

    /// Verifica se é o outpoint nulo
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.vout == NULL_VOUT && self.txid.is_zero()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.txid.as_bytes());
        wire::write_u32(out, self.vout);
        out.push(self.tree as u8);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self, DecodeError> {
        let txid = Hash256::from_bytes(cur.read_array()?);
        let vout = cur.read_u32()?;
        let tree = TxTree::try_from(cur.read_u8()?)?;
        Ok(Self { txid, vout, tree })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.txid, self.vout, self.tree as u8)
    }
}

/// Input de transação, com os campos de witness do formato de rede
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Referência ao UTXO sendo gasto
    pub previous_output: OutPoint,
    /// Número de sequência
    pub sequence: u32,
    /// Valor declarado do UTXO gasto (witness; conferido na validação)
    pub value_in: Amount,
    /// Altura do bloco em que o UTXO foi criado (witness)
    pub block_height: u32,
    /// Índice da transação criadora dentro do bloco (witness)
    pub block_index: u32,
    /// Script que prova o direito de gastar o UTXO
    pub signature_script: Vec<u8>,
}

impl TxInput {
    /// Cria um novo input de transação
    #[must_use]
    pub const fn new(previous_output: OutPoint, value_in: Amount, signature_script: Vec<u8>) -> Self {
        Self {
            previous_output,
            sequence: MAX_SEQUENCE,
            value_in,
            block_height: 0,
            block_index: 0,
            signature_script,
        }
    }

    /// Cria o input de uma coinbase
    #[must_use]
    pub const fn coinbase(value_in: Amount, signature_script: Vec<u8>) -> Self {
        Self {
            previous_output: OutPoint::null(),
            sequence: MAX_SEQUENCE,
            value_in,
            block_height: 0,
            block_index: NULL_VOUT,
            signature_script,
        }
    }

    /// Verifica se este input gasta o outpoint nulo
    #[must_use]
    pub fn is_null_input(&self) -> bool {
        self.previous_output.is_null()
    }
}

/// Output de transação
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Valor em atoms
    pub value: Amount,
    /// Versão do script; tem de casar com a do input que o gasta
    pub script_version: u16,
    /// Script que define as condições para gastar este output
    pub pk_script: Vec<u8>,
}

impl TxOutput {
    /// Cria um novo output de transação
    #[must_use]
    pub const fn new(value: Amount, pk_script: Vec<u8>) -> Self {
        Self {
            value,
            script_version: 0,
            pk_script,
        }
    }
}

/// Transação no formato de rede
///
/// A palavra de versão serializada carrega a versão nos 2 bytes baixos e o
/// modo de serialização nos 2 bytes altos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Versão da transação
    pub version: u16,
    /// Inputs da transação
    pub inputs: Vec<TxInput>,
    /// Outputs da transação
    pub outputs: Vec<TxOutput>,
    /// Lock time (altura ou tempo mínimo para inclusão em bloco)
    pub lock_time: u32,
    /// Altura a partir da qual a transação deixa de ser válida
    pub expiry: u32,
}

impl Transaction {
    /// Cria uma nova transação
    #[must_use]
    pub const fn new(version: u16, inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time: 0,
            expiry: 0,
        }
    }

    /// Cria uma transação de coinbase
    ///
    /// O script sig carrega a altura do bloco para impedir hashes de
    /// coinbase duplicados entre alturas.
    #[must_use]
    pub fn coinbase(block_height: u32, value: Amount, pk_script: Vec<u8>) -> Self {
        let mut script_sig = Vec::with_capacity(8);
        script_sig.extend_from_slice(&u64::from(block_height).to_le_bytes());

        let inputs = vec![TxInput::coinbase(value, script_sig)];
        let outputs = vec![TxOutput::new(value, pk_script)];
        Self::new(1, inputs, outputs)
    }

    /// Verifica se é uma transação de coinbase
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_null_input() && !self.outputs.is_empty()
    }

    /// Serializa no modo pedido
    #[must_use]
    pub fn encode(&self, serialize_type: TxSerializeType) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.estimated_size());
        let version_word =
            u32::from(self.version) | (u32::from(serialize_type as u16) << 16);
        wire::write_u32(&mut out, version_word);

        match serialize_type {
            TxSerializeType::Full => {
                self.encode_prefix(&mut out);
                self.encode_witness(&mut out);
            }
            TxSerializeType::NoWitness => self.encode_prefix(&mut out),
            TxSerializeType::OnlyWitness => self.encode_witness(&mut out),
        }
        out
    }

    fn encode_prefix(&self, out: &mut Vec<u8>) {
        wire::write_var_int(out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.previous_output.encode(out);
            wire::write_u32(out, input.sequence);
        }
        wire::write_var_int(out, self.outputs.len() as u64);
        for output in &self.outputs {
            wire::write_i64(out, output.value);
            wire::write_u16(out, output.script_version);
            wire::write_var_bytes(out, &output.pk_script);
        }
        wire::write_u32(out, self.lock_time);
        wire::write_u32(out, self.expiry);
    }

    fn encode_witness(&self, out: &mut Vec<u8>) {
        wire::write_var_int(out, self.inputs.len() as u64);
        for input in &self.inputs {
            wire::write_i64(out, input.value_in);
            wire::write_u32(out, input.block_height);
            wire::write_u32(out, input.block_index);
            wire::write_var_bytes(out, &input.signature_script);
        }
    }

    /// Decodifica uma transação do formato de rede
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes forem malformados ou truncados
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Self, DecodeError> {
        let version_word = cur.read_u32()?;
        let version = (version_word & 0xffff) as u16;
        let serialize_type = TxSerializeType::try_from((version_word >> 16) as u16)?;

        let mut tx = Self::new(version, Vec::new(), Vec::new());
        match serialize_type {
            TxSerializeType::Full => {
                tx.decode_prefix(cur)?;
                tx.decode_witness(cur, false)?;
            }
            TxSerializeType::NoWitness => tx.decode_prefix(cur)?,
            TxSerializeType::OnlyWitness => tx.decode_witness(cur, true)?,
        }
        Ok(tx)
    }

    fn decode_prefix(&mut self, cur: &mut Cursor<'_>) -> Result<(), DecodeError> {
        let input_count = cur.read_var_count()?;
        self.inputs.reserve(input_count);
        for _ in 0..input_count {
            let previous_output = OutPoint::decode(cur)?;
            let sequence = cur.read_u32()?;
            self.inputs.push(TxInput {
                previous_output,
                sequence,
                value_in: 0,
                block_height: 0,
                block_index: 0,
                signature_script: Vec::new(),
            });
        }

        let output_count = cur.read_var_count()?;
        self.outputs.reserve(output_count);
        for _ in 0..output_count {
            let value = cur.read_i64()?;
            let script_version = cur.read_u16()?;
            let pk_script = cur.read_var_bytes()?;
            self.outputs.push(TxOutput {
                value,
                script_version,
                pk_script,
            });
        }

        self.lock_time = cur.read_u32()?;
        self.expiry = cur.read_u32()?;
        Ok(())
    }

    fn decode_witness(
        &mut self,
        cur: &mut Cursor<'_>,
        witness_only: bool,
    ) -> Result<(), DecodeError> {
        let count = cur.read_var_count()?;
        if witness_only {
            self.inputs = (0..count)
                .map(|_| TxInput::new(OutPoint::null(), 0, Vec::new()))
                .collect();
        } else if count != self.inputs.len() {
            return Err(DecodeError::InvalidValue(format!(
                "witness count {count} does not match input count {}",
                self.inputs.len()
            )));
        }

        for input in &mut self.inputs {
            input.value_in = cur.read_i64()?;
            input.block_height = cur.read_u32()?;
            input.block_index = cur.read_u32()?;
            input.signature_script = cur.read_var_bytes()?;
        }
        Ok(())
    }

    /// Hash da transação: BLAKE-256 da serialização sem witness
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::blake256(&self.encode(TxSerializeType::NoWitness))
    }

    /// Hash completo: BLAKE-256 dupla da serialização com witness
    #[must_use]
    pub fn full_hash(&self) -> Hash256 {
        Hash256::blake256d(&self.encode(TxSerializeType::Full))
    }

    /// Digest assinado pelos inputs: serialização sem witness com o script
    /// em questão substituído no input assinado
    #[must_use]
    pub fn sig_hash(&self, subject_script: &[u8], input_index: usize) -> Hash256 {
        let mut out = Vec::with_capacity(self.estimated_size());
        wire::write_u32(&mut out, u32::from(self.version));
        wire::write_var_int(&mut out, self.inputs.len() as u64);
        for (i, input) in self.inputs.iter().enumerate() {
            input.previous_output.encode(&mut out);
            wire::write_u32(&mut out, input.sequence);
            if i == input_index {
                wire::write_var_bytes(&mut out, subject_script);
            } else {
                wire::write_var_bytes(&mut out, &[]);
            }
        }
        wire::write_var_int(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            wire::write_i64(&mut out, output.value);
            wire::write_u16(&mut out, output.script_version);
            wire::write_var_bytes(&mut out, &output.pk_script);
        }
        wire::write_u32(&mut out, self.lock_time);
        wire::write_u32(&mut out, self.expiry);
        wire::write_u32(&mut out, input_index as u32);
        Hash256::blake256(&out)
    }

    /// Calcula o valor total dos outputs
    ///
    /// # Errors
    ///
    /// Retorna erro se houver overflow no somatório
    pub fn total_output_value(&self) -> Result<Amount, DecodeError> {
        let mut total: Amount = 0;
        for output in &self.outputs {
            total = total
                .checked_add(output.value)
                .ok_or_else(|| DecodeError::InvalidValue("output value overflow".into()))?;
        }
        Ok(total)
    }

    /// Calcula o valor total declarado dos inputs (campos de witness)
    ///
    /// # Errors
    ///
    /// Retorna erro se houver overflow no somatório
    pub fn total_input_value(&self) -> Result<Amount, DecodeError> {
        let mut total: Amount = 0;
        for input in &self.inputs {
            total = total
                .checked_add(input.value_in)
                .ok_or_else(|| DecodeError::InvalidValue("input value overflow".into()))?;
        }
        Ok(total)
    }

    /// Taxa paga pela transação segundo os valores declarados
    #[must_use]
    pub fn declared_fee(&self) -> Amount {
        if self.is_coinbase() {
            return 0;
        }
        let total_in = self.total_input_value().unwrap_or(0);
        let total_out = self.total_output_value().unwrap_or(0);
        total_in.saturating_sub(total_out)
    }

    /// Tamanho serializado estimado em bytes (modo completo)
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| 37 + 4 + 16 + 9 + i.signature_script.len())
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|o| 8 + 2 + 9 + o.pk_script.len())
            .sum();
        4 + 2 + inputs + outputs + 4 + 4 + 9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let outpoint = OutPoint::new(Hash256::blake256(b"prev"), 3, TxTree::Stake);
        let input = TxInput {
            previous_output: outpoint,
            sequence: 7,
            value_in: 50_000,
            block_height: 12,
            block_index: 1,
            signature_script: vec![0xab; 20],
        };
        let output = TxOutput {
            value: 49_000,
            script_version: 0,
            pk_script: vec![0xcd; 25],
        };
        let mut tx = Transaction::new(1, vec![input], vec![output]);
        tx.lock_time = 99;
        tx.expiry = 1000;
        tx
    }

    #[test]
    fn test_full_round_trip() {
        let tx = sample_tx();
        let bytes = tx.encode(TxSerializeType::Full);
        let decoded = Transaction::decode(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.encode(TxSerializeType::Full), bytes);
    }

    #[test]
    fn test_no_witness_round_trip_drops_witness() {
        let tx = sample_tx();
        let bytes = tx.encode(TxSerializeType::NoWitness);
        let decoded = Transaction::decode(&mut Cursor::new(&bytes)).unwrap();

        assert_eq!(decoded.inputs[0].previous_output, tx.inputs[0].previous_output);
        assert_eq!(decoded.inputs[0].value_in, 0);
        assert!(decoded.inputs[0].signature_script.is_empty());
        assert_eq!(decoded.encode(TxSerializeType::NoWitness), bytes);
    }

    #[test]
    fn test_only_witness_round_trip() {
        let tx = sample_tx();
        let bytes = tx.encode(TxSerializeType::OnlyWitness);
        let decoded = Transaction::decode(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(decoded.inputs[0].signature_script, tx.inputs[0].signature_script);
        assert_eq!(decoded.encode(TxSerializeType::OnlyWitness), bytes);
    }

    #[test]
    fn test_hash_ignores_witness() {
        let mut tx = sample_tx();
        let hash = tx.hash();
        tx.inputs[0].signature_script = vec![0xff; 64];
        assert_eq!(tx.hash(), hash);
        assert_ne!(tx.full_hash(), hash);
    }

    #[test]
    fn test_coinbase_shape() {
        let coinbase = Transaction::coinbase(100, 5000, vec![1, 2, 3]);
        assert!(coinbase.is_coinbase());
        assert!(coinbase.inputs[0].is_null_input());
        assert_eq!(coinbase.outputs[0].value, 5000);
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn test_sig_hash_distinguishes_inputs_and_scripts() {
        let mut tx = sample_tx();
        tx.inputs.push(TxInput::new(
            OutPoint::new(Hash256::blake256(b"other"), 0, TxTree::Regular),
            10,
            Vec::new(),
        ));

        let script = vec![0x51];
        assert_ne!(tx.sig_hash(&script, 0), tx.sig_hash(&script, 1));
        assert_ne!(tx.sig_hash(&script, 0), tx.sig_hash(&[0x52], 0));

        // O digest não depende do witness (a assinatura não se cobre)
        let digest = tx.sig_hash(&script, 0);
        tx.inputs[0].signature_script = vec![9; 12];
        assert_eq!(tx.sig_hash(&script, 0), digest);
    }

    #[test]
    fn test_truncated_decode_fails() {
        let tx = sample_tx();
        let bytes = tx.encode(TxSerializeType::Full);
        let truncated = &bytes[..bytes.len() - 3];
        assert!(Transaction::decode(&mut Cursor::new(truncated)).is_err());
    }

    #[test]
    fn test_value_overflow_detected() {
        let mut tx = sample_tx();
        tx.outputs.push(TxOutput::new(Amount::MAX, Vec::new()));
        tx.outputs.push(TxOutput::new(1, Vec::new()));
        assert!(tx.total_output_value().is_err());
    }
}
