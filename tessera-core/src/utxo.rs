//! Conjunto de saídas não gastas com atualizações journaled
//!
//! O invariante central: existe uma entrada se e só se a saída foi criada
//! por uma transação confirmada na cadeia principal corrente e ainda não
//! foi gasta. Conectar um bloco remove entradas gastas e cria as novas;
//! desconectar inverte com o journal capturado na conexão.

use serde::{Deserialize, Serialize};
use shared::Amount;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DecodeError, StoreError, ValidationError};
use crate::script;
use crate::script::opcodes::{OP_RETURN, OP_SSGEN, OP_SSRTX, OP_SSTX, OP_SSTXCHANGE};
use crate::store::{WriteTxn, BUCKET_UTXO};
use crate::transaction::{OutPoint, Transaction, TxTree};
use crate::wire::{self, Cursor};

/// Papel de stake de uma saída, derivado do opcode de marcação
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeKind {
    TicketPurchase,
    Vote,
    Revocation,
    StakeChange,
}

impl StakeKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            OP_SSTX => Some(Self::TicketPurchase),
            OP_SSGEN => Some(Self::Vote),
            OP_SSRTX => Some(Self::Revocation),
            OP_SSTXCHANGE => Some(Self::StakeChange),
            _ => None,
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::TicketPurchase => 1,
            Self::Vote => 2,
            Self::Revocation => 3,
            Self::StakeChange => 4,
        }
    }

    fn from_code(code: u8) -> Result<Option<Self>, DecodeError> {
        match code {
            0 => Ok(None),
            1 => Ok(Some(Self::TicketPurchase)),
            2 => Ok(Some(Self::Vote)),
            3 => Ok(Some(Self::Revocation)),
            4 => Ok(Some(Self::StakeChange)),
            other => Err(DecodeError::InvalidValue(format!(
                "unknown stake kind {other}"
            ))),
        }
    }
}

/// Uma saída não gasta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    /// Valor em atoms
    pub value: Amount,
    /// Versão do script da saída
    pub script_version: u16,
    /// Script de bloqueio
    pub pk_script: Vec<u8>,
    /// Altura do bloco que criou a saída
    pub height: u32,
    /// Índice da transação criadora dentro do bloco
    pub block_index: u32,
    /// A saída vem de uma coinbase (maturidade obrigatória)
    pub is_coinbase: bool,
    /// O ticket correspondente expirou
    pub is_expired: bool,
    /// Marcação de stake da saída
    pub stake_kind: Option<StakeKind>,
}

impl UtxoEntry {
    /// Codec estável usado na persistência
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.pk_script.len());
        wire::write_i64(&mut out, self.value);
        wire::write_u16(&mut out, self.script_version);
        wire::write_u32(&mut out, self.height);
        wire::write_u32(&mut out, self.block_index);
        let mut flags = 0u8;
        if self.is_coinbase {
            flags |= 0x01;
        }
        if self.is_expired {
            flags |= 0x02;
        }
        flags |= self.stake_kind.map_or(0, StakeKind::code) << 4;
        out.push(flags);
        wire::write_var_bytes(&mut out, &self.pk_script);
        out
    }

    /// Decodifica uma entrada persistida
    ///
    /// # Errors
    ///
    /// Retorna erro com bytes malformados
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(data);
        let value = cur.read_i64()?;
        let script_version = cur.read_u16()?;
        let height = cur.read_u32()?;
        let block_index = cur.read_u32()?;
        let flags = cur.read_u8()?;
        let pk_script = cur.read_var_bytes()?;
        Ok(Self {
            value,
            script_version,
            pk_script,
            height,
            block_index,
            is_coinbase: flags & 0x01 != 0,
            is_expired: flags & 0x02 != 0,
            stake_kind: StakeKind::from_code(flags >> 4)?,
        })
    }
}

/// Journal de uma transação conectada, suficiente para a inversão exata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxUndo {
    /// Entradas removidas ao gastar, na ordem dos inputs
    pub spent: Vec<(OutPoint, UtxoEntry)>,
    /// Outpoints criados pelos outputs
    pub created: Vec<OutPoint>,
}

/// Journal de um bloco inteiro, na ordem de conexão das transações
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoJournal {
    pub undos: Vec<TxUndo>,
}

/// Vista imutável do conjunto de UTXOs
///
/// Partilha a estrutura com a loja; escritas posteriores não alteram
/// vistas já publicadas.
#[derive(Debug, Clone)]
pub struct UtxoView {
    entries: Arc<HashMap<OutPoint, UtxoEntry>>,
}

impl UtxoView {
    /// Procura uma saída não gasta
    #[must_use]
    pub fn fetch(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Número de entradas
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loja de UTXOs com journaling e persistência via backend chave-valor
#[derive(Debug, Default)]
pub struct UtxoStore {
    entries: Arc<HashMap<OutPoint, UtxoEntry>>,
    // Alterações desde o último commit; None marca remoção
    dirty: HashMap<OutPoint, Option<UtxoEntry>>,
}

impl UtxoStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Procura uma saída não gasta
    #[must_use]
    pub fn fetch(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Número de entradas vivas
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vista imutável e barata do estado corrente
    #[must_use]
    pub fn snapshot(&self) -> UtxoView {
        UtxoView {
            entries: Arc::clone(&self.entries),
        }
    }

    /// Conecta uma transação: gasta os inputs e cria os outputs
    ///
    /// Outputs provadamente não gastáveis (OP_RETURN) não entram no
    /// conjunto.
    ///
    /// # Errors
    ///
    /// `MissingInput` se um input não resolver para uma entrada viva; um
    /// gasto duplicado dentro do bloco falha da mesma forma.
    pub fn connect_transaction(
        &mut self,
        tx: &Transaction,
        tree: TxTree,
        height: u32,
        block_index: u32,
    ) -> Result<TxUndo, ValidationError> {
        let mut undo = TxUndo::default();
        let entries = Arc::make_mut(&mut self.entries);

        for input in &tx.inputs {
            if input.is_null_input() {
                continue; // coinbase / stakebase
            }
            let outpoint = input.previous_output;
            let entry = entries
                .remove(&outpoint)
                .ok_or(ValidationError::MissingInput(outpoint))?;
            self.dirty.insert(outpoint, None);
            undo.spent.push((outpoint, entry));
        }

        let txid = tx.hash();
        let is_coinbase = tree == TxTree::Regular && tx.is_coinbase();
        for (vout, output) in tx.outputs.iter().enumerate() {
            if output.pk_script.first() == Some(&OP_RETURN) {
                continue;
            }
            let outpoint = OutPoint::new(txid, vout as u32, tree);
            let entry = UtxoEntry {
                value: output.value,
                script_version: output.script_version,
                pk_script: output.pk_script.clone(),
                height,
                block_index,
                is_coinbase,
                is_expired: false,
                stake_kind: script::stake_tag(&output.pk_script).and_then(StakeKind::from_tag),
            };
            entries.insert(outpoint, entry.clone());
            self.dirty.insert(outpoint, Some(entry));
            undo.created.push(outpoint);
        }

        Ok(undo)
    }

    /// Desconecta uma transação usando o journal da conexão
    pub fn disconnect_transaction(&mut self, undo: &TxUndo) {
        let entries = Arc::make_mut(&mut self.entries);
        for outpoint in &undo.created {
            entries.remove(outpoint);
            self.dirty.insert(*outpoint, None);
        }
        for (outpoint, entry) in &undo.spent {
            entries.insert(*outpoint, entry.clone());
            self.dirty.insert(*outpoint, Some(entry.clone()));
        }
    }

    /// Desconecta um bloco inteiro, invertendo a ordem das transações
    pub fn disconnect_block(&mut self, journal: &UtxoJournal) {
        for undo in journal.undos.iter().rev() {
            self.disconnect_transaction(undo);
        }
    }

    /// Persiste as entradas alteradas na transação de escrita dada
    ///
    /// # Errors
    ///
    /// Propaga falhas do backend; o estado sujo permanece para repetição
    pub fn commit(&mut self, txn: &mut dyn WriteTxn) -> Result<(), StoreError> {
        for (outpoint, entry) in &self.dirty {
            let key = outpoint_key(outpoint);
            match entry {
                Some(entry) => txn.put(BUCKET_UTXO, &key, &entry.encode())?,
                None => txn.delete(BUCKET_UTXO, &key)?,
            }
        }
        self.dirty.clear();
        Ok(())
    }

    /// Itera as entradas vivas (para testes e inspeção)
    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &UtxoEntry)> {
        self.entries.iter()
    }
}

/// Chave de persistência de um outpoint
#[must_use]
pub fn outpoint_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.extend_from_slice(outpoint.txid.as_bytes());
    key.extend_from_slice(&outpoint.vout.to_le_bytes());
    key.push(outpoint.tree as u8);
    key
}
