//! Interface do backend chave-valor e implementação em memória
//!
//! O motor exige do colaborador de armazenamento transações de escrita
//! multi-chave tudo-ou-nada; sem isso não há consistência a falhas. Os
//! buckets aninhados compõem-se por nome; chaves e valores são sequências
//! de bytes opacas.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::StoreError;

/// Bucket dos blocos serializados por hash
pub const BUCKET_BLOCKS: &str = "blocks";
/// Bucket do estado dos nós do índice por (altura, hash)
pub const BUCKET_BLOCK_INDEX: &str = "blockidx";
/// Bucket das saídas não gastas
pub const BUCKET_UTXO: &str = "utxo";
/// Buckets do estado de stake
pub const BUCKET_STAKE_LIVE: &str = "stake/live";
pub const BUCKET_STAKE_IMMATURE: &str = "stake/immature";
pub const BUCKET_STAKE_MISSED: &str = "stake/missed";
pub const BUCKET_STAKE_REVOKED: &str = "stake/revoked";
/// Bucket de metadados (tip corrente)
pub const BUCKET_META: &str = "meta";
/// Bucket da cadeia principal por altura
pub const BUCKET_BEST_CHAIN: &str = "meta/bestchain";
/// Chave do hash do tip dentro de `meta`
pub const KEY_TIP: &[u8] = b"tip";

/// Transação de escrita; as alterações só ficam visíveis no commit
pub trait WriteTxn {
    /// Grava um par chave-valor num bucket
    ///
    /// # Errors
    ///
    /// Propaga falhas de I/O do backend
    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Remove uma chave de um bucket
    ///
    /// # Errors
    ///
    /// Propaga falhas de I/O do backend
    fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), StoreError>;

    /// Aplica todas as alterações atomicamente
    ///
    /// # Errors
    ///
    /// Em erro, nenhuma alteração fica visível
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Descarta todas as alterações
    fn rollback(self: Box<Self>);
}

/// Transação de leitura com vista consistente
pub trait ReadTxn {
    /// Lê o valor de uma chave
    ///
    /// # Errors
    ///
    /// Propaga falhas de I/O do backend
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Itera por ordem de chave todos os pares com o prefixo dado
    fn seek<'a>(
        &'a self,
        bucket: &str,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;
}

/// Backend de persistência
pub trait KvBackend: Send + Sync {
    fn begin_write(&self) -> Box<dyn WriteTxn + '_>;
    fn begin_read(&self) -> Box<dyn ReadTxn + '_>;
}

type Buckets = BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>;

/// Backend em memória usado pelos testes e pelo harness de simnet
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    buckets: Arc<RwLock<Buckets>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

enum PendingOp {
    Put(String, Vec<u8>, Vec<u8>),
    Delete(String, Vec<u8>),
}

struct MemoryWriteTxn<'a> {
    backend: &'a MemoryKv,
    pending: Vec<PendingOp>,
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.pending
            .push(PendingOp::Put(bucket.to_string(), key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), StoreError> {
        self.pending
            .push(PendingOp::Delete(bucket.to_string(), key.to_vec()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut buckets = self
            .backend
            .buckets
            .write()
            .map_err(|_| StoreError::Io("lock poisoned".into()))?;
        for op in self.pending {
            match op {
                PendingOp::Put(bucket, key, value) => {
                    buckets.entry(bucket).or_default().insert(key, value);
                }
                PendingOp::Delete(bucket, key) => {
                    if let Some(entries) = buckets.get_mut(&bucket) {
                        entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

struct MemoryReadTxn {
    // Cópia consistente no momento do begin
    snapshot: Buckets,
}

impl ReadTxn for MemoryReadTxn {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .snapshot
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn seek<'a>(
        &'a self,
        bucket: &str,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
        let prefix = prefix.to_vec();
        match self.snapshot.get(bucket) {
            None => Box::new(std::iter::empty()),
            Some(entries) => Box::new(
                entries
                    .range(prefix.clone()..)
                    .take_while(move |(key, _)| key.starts_with(&prefix))
                    .map(|(key, value)| (key.clone(), value.clone())),
            ),
        }
    }
}

impl KvBackend for MemoryKv {
    fn begin_write(&self) -> Box<dyn WriteTxn + '_> {
        Box::new(MemoryWriteTxn {
            backend: self,
            pending: Vec::new(),
        })
    }

    fn begin_read(&self) -> Box<dyn ReadTxn + '_> {
        let snapshot = self
            .buckets
            .read()
            .map(|buckets| buckets.clone())
            .unwrap_or_default();
        Box::new(MemoryReadTxn { snapshot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_is_atomic_and_visible() {
        let backend = MemoryKv::new();

        let mut txn = backend.begin_write();
        txn.put(BUCKET_META, b"a", b"1").unwrap();
        txn.put(BUCKET_META, b"b", b"2").unwrap();

        // antes do commit nada é visível
        let read = backend.begin_read();
        assert_eq!(read.get(BUCKET_META, b"a").unwrap(), None);

        txn.commit().unwrap();
        let read = backend.begin_read();
        assert_eq!(read.get(BUCKET_META, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(read.get(BUCKET_META, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_rollback_discards() {
        let backend = MemoryKv::new();
        let mut txn = backend.begin_write();
        txn.put(BUCKET_META, b"x", b"9").unwrap();
        txn.rollback();

        let read = backend.begin_read();
        assert_eq!(read.get(BUCKET_META, b"x").unwrap(), None);
    }

    #[test]
    fn test_delete_within_transaction() {
        let backend = MemoryKv::new();
        let mut txn = backend.begin_write();
        txn.put(BUCKET_UTXO, b"k", b"v").unwrap();
        txn.commit().unwrap();

        let mut txn = backend.begin_write();
        txn.delete(BUCKET_UTXO, b"k").unwrap();
        txn.commit().unwrap();

        let read = backend.begin_read();
        assert_eq!(read.get(BUCKET_UTXO, b"k").unwrap(), None);
    }

    #[test]
    fn test_seek_is_ordered_and_prefixed() {
        let backend = MemoryKv::new();
        let mut txn = backend.begin_write();
        txn.put(BUCKET_BEST_CHAIN, b"aa/1", b"1").unwrap();
        txn.put(BUCKET_BEST_CHAIN, b"aa/3", b"3").unwrap();
        txn.put(BUCKET_BEST_CHAIN, b"aa/2", b"2").unwrap();
        txn.put(BUCKET_BEST_CHAIN, b"bb/1", b"x").unwrap();
        txn.commit().unwrap();

        let read = backend.begin_read();
        let entries: Vec<_> = read.seek(BUCKET_BEST_CHAIN, b"aa/").collect();
        assert_eq!(
            entries,
            vec![
                (b"aa/1".to_vec(), b"1".to_vec()),
                (b"aa/2".to_vec(), b"2".to_vec()),
                (b"aa/3".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_read_snapshot_is_stable() {
        let backend = MemoryKv::new();
        let mut txn = backend.begin_write();
        txn.put(BUCKET_META, b"k", b"old").unwrap();
        txn.commit().unwrap();

        let read = backend.begin_read();
        let mut txn = backend.begin_write();
        txn.put(BUCKET_META, b"k", b"new").unwrap();
        txn.commit().unwrap();

        assert_eq!(read.get(BUCKET_META, b"k").unwrap(), Some(b"old".to_vec()));
    }
}
