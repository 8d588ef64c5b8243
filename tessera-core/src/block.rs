use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use shared::{merkle_root, Amount, Hash256};

use crate::error::DecodeError;
use crate::params::{AlgorithmId, ChainParams};
use crate::transaction::{Transaction, TxSerializeType};
use crate::wire::{self, Cursor};

/// Tamanho serializado do cabeçalho antes da ativação do Equihash
pub const HEADER_LEN_V0: usize = 180;

/// Tamanho do prefixo do cabeçalho (sem solução) após a ativação
pub const HEADER_PREFIX_LEN_V1: usize = 208;

/// Nonce do cabeçalho; a largura acompanha o algoritmo de prova de trabalho
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockNonce {
    /// Nonce clássico de 4 bytes
    V0(u32),
    /// Nonce de 32 bytes usado pelo Equihash
    V1([u8; 32]),
}

impl BlockNonce {
    /// Algoritmo implícito pela largura do nonce
    #[must_use]
    pub const fn is_equihash(&self) -> bool {
        matches!(self, Self::V1(_))
    }
}

/// Cabeçalho do bloco
///
/// O hash do bloco é o BLAKE-256 do prefixo serializado, sem a solução
/// Equihash; a verificação de prova de trabalho usa o hash com a solução.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Versão do bloco
    pub version: u32,
    /// Hash do bloco anterior
    pub previous_hash: Hash256,
    /// Merkle root das transações regulares
    pub merkle_root: Hash256,
    /// Merkle root das transações de stake
    pub stake_root: Hash256,
    /// Bits de voto agregados dos votos deste bloco
    pub vote_bits: u16,
    /// Últimos 6 bytes do hash dos vencedores da loteria
    pub final_state: [u8; 6],
    /// Número de votos incluídos
    pub voters: u16,
    /// Número de tickets comprados neste bloco
    pub fresh_stake: u8,
    /// Número de revogações neste bloco
    pub revocations: u8,
    /// Tamanho do pool de tickets vivos após este bloco
    pub pool_size: u32,
    /// Alvo de dificuldade em forma compacta
    pub bits: u32,
    /// Dificuldade de stake (preço do ticket) em atoms
    pub sbits: Amount,
    /// Altura do bloco
    pub height: u32,
    /// Tamanho serializado do bloco em bytes
    pub size: u32,
    /// Timestamp do bloco (resolução de segundos)
    pub timestamp: DateTime<Utc>,
    /// Nonce de mineração
    pub nonce: BlockNonce,
    /// Dados extras reservados
    pub extra_data: [u8; 32],
    /// Versão de stake sinalizada
    pub stake_version: u32,
    /// Solução Equihash; vazia antes da ativação
    pub equihash_solution: Vec<u8>,
}

impl BlockHeader {
    /// Serializa o prefixo do cabeçalho, sem a solução Equihash
    #[must_use]
    pub fn encode_prefix(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_PREFIX_LEN_V1);
        wire::write_u32(&mut out, self.version);
        out.extend_from_slice(self.previous_hash.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
        out.extend_from_slice(self.stake_root.as_bytes());
        wire::write_u16(&mut out, self.vote_bits);
        out.extend_from_slice(&self.final_state);
        wire::write_u16(&mut out, self.voters);
        out.push(self.fresh_stake);
        out.push(self.revocations);
        wire::write_u32(&mut out, self.pool_size);
        wire::write_u32(&mut out, self.bits);
        wire::write_i64(&mut out, self.sbits);
        wire::write_u32(&mut out, self.height);
        wire::write_u32(&mut out, self.size);
        wire::write_u32(&mut out, self.timestamp.timestamp() as u32);
        match self.nonce {
            BlockNonce::V0(nonce) => wire::write_u32(&mut out, nonce),
            BlockNonce::V1(nonce) => out.extend_from_slice(&nonce),
        }
        out.extend_from_slice(&self.extra_data);
        wire::write_u32(&mut out, self.stake_version);
        out
    }

    /// Serializa o cabeçalho completo (prefixo mais solução)
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.encode_prefix();
        out.extend_from_slice(&self.equihash_solution);
        out
    }

    /// Decodifica um cabeçalho
    ///
    /// A largura do nonce e o comprimento da solução dependem do algoritmo
    /// ativo na altura lida do próprio cabeçalho.
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes forem malformados ou truncados
    pub fn decode(cur: &mut Cursor<'_>, params: &ChainParams) -> Result<Self, DecodeError> {
        let version = cur.read_u32()?;
        let previous_hash = Hash256::from_bytes(cur.read_array()?);
        let merkle_root = Hash256::from_bytes(cur.read_array()?);
        let stake_root = Hash256::from_bytes(cur.read_array()?);
        let vote_bits = cur.read_u16()?;
        let final_state: [u8; 6] = cur.read_array()?;
        let voters = cur.read_u16()?;
        let fresh_stake = cur.read_u8()?;
        let revocations = cur.read_u8()?;
        let pool_size = cur.read_u32()?;
        let bits = cur.read_u32()?;
        let sbits = cur.read_i64()?;
        let height = cur.read_u32()?;
        let size = cur.read_u32()?;
        let unix = cur.read_u32()?;
        let timestamp = Utc
            .timestamp_opt(i64::from(unix), 0)
            .single()
            .ok_or_else(|| DecodeError::InvalidValue("timestamp out of range".into()))?;

        let algorithm = params.algorithm_at(height);
        let (nonce, equihash_solution) = match algorithm {
            AlgorithmId::V0 => (BlockNonce::V0(cur.read_u32()?), Vec::new()),
            AlgorithmId::V1Equihash { .. } => {
                let nonce = BlockNonce::V1(cur.read_array()?);
                (nonce, Vec::new())
            }
        };
        let extra_data: [u8; 32] = cur.read_array()?;
        let stake_version = cur.read_u32()?;
        let equihash_solution = match algorithm {
            AlgorithmId::V0 => equihash_solution,
            AlgorithmId::V1Equihash { .. } => {
                cur.read_bytes(algorithm.solution_len())?.to_vec()
            }
        };

        Ok(Self {
            version,
            previous_hash,
            merkle_root,
            stake_root,
            vote_bits,
            final_state,
            voters,
            fresh_stake,
            revocations,
            pool_size,
            bits,
            sbits,
            height,
            size,
            timestamp,
            nonce,
            extra_data,
            stake_version,
            equihash_solution,
        })
    }

    /// Material de entrada do Equihash: o cabeçalho até ao nonce
    #[must_use]
    pub fn equihash_input(&self) -> Vec<u8> {
        let mut prefix = self.encode_prefix();
        prefix.truncate(140);
        prefix
    }

    /// Hash do bloco: BLAKE-256 do prefixo do cabeçalho
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::blake256(&self.encode_prefix())
    }

    /// Hash de prova de trabalho: BLAKE-256 do cabeçalho com a solução
    #[must_use]
    pub fn pow_hash(&self) -> Hash256 {
        Hash256::blake256(&self.encode())
    }
}

/// Bloco completo: cabeçalho mais as duas árvores de transações
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Cabeçalho do bloco
    pub header: BlockHeader,
    /// Transações regulares (a primeira é a coinbase)
    pub transactions: Vec<Transaction>,
    /// Transações de stake (tickets, votos e revogações)
    pub stake_transactions: Vec<Transaction>,
}

impl Block {
    /// Cria um novo bloco
    #[must_use]
    pub const fn new(
        header: BlockHeader,
        transactions: Vec<Transaction>,
        stake_transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            header,
            transactions,
            stake_transactions,
        }
    }

    /// Obtém o hash do bloco
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Serializa o bloco completo
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.encode();
        wire::write_var_int(&mut out, self.transactions.len() as u64);
        for tx in &self.transactions {
            out.extend_from_slice(&tx.encode(TxSerializeType::Full));
        }
        wire::write_var_int(&mut out, self.stake_transactions.len() as u64);
        for tx in &self.stake_transactions {
            out.extend_from_slice(&tx.encode(TxSerializeType::Full));
        }
        out
    }

    /// Decodifica um bloco completo
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes forem malformados ou truncados
    pub fn decode(cur: &mut Cursor<'_>, params: &ChainParams) -> Result<Self, DecodeError> {
        let header = BlockHeader::decode(cur, params)?;

        let regular_count = cur.read_var_count()?;
        let mut transactions = Vec::with_capacity(regular_count);
        for _ in 0..regular_count {
            transactions.push(Transaction::decode(cur)?);
        }

        let stake_count = cur.read_var_count()?;
        let mut stake_transactions = Vec::with_capacity(stake_count);
        for _ in 0..stake_count {
            stake_transactions.push(Transaction::decode(cur)?);
        }

        Ok(Self {
            header,
            transactions,
            stake_transactions,
        })
    }

    /// Merkle root da árvore regular
    ///
    /// A forma legada usa o hash sem witness de cada transação; a forma
    /// completa usa o hash duplo da serialização com witness.
    #[must_use]
    pub fn merkle_root(&self, legacy: bool) -> Hash256 {
        merkle_root(&Self::leaves(&self.transactions, legacy))
    }

    /// Merkle root da árvore de stake
    #[must_use]
    pub fn stake_root(&self, legacy: bool) -> Hash256 {
        merkle_root(&Self::leaves(&self.stake_transactions, legacy))
    }

    fn leaves(txs: &[Transaction], legacy: bool) -> Vec<Hash256> {
        txs.iter()
            .map(|tx| if legacy { tx.hash() } else { tx.full_hash() })
            .collect()
    }

    /// Tamanho serializado do bloco em bytes
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        self.encode().len()
    }
}
