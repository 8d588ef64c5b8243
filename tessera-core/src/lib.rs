//! Motor de validação de consenso e seleção de cadeia da Tessera
//!
//! Mantém o livro-razão canónico: valida blocos e transações contra as
//! regras de consenso, escolhe a melhor cadeia sob reorganizações,
//! persiste o estado através de um backend chave-valor e publica
//! notificações para as camadas de rede e RPC.

pub mod block;
pub mod chain;
pub mod difficulty;
pub mod equihash;
pub mod error;
pub mod index;
pub mod params;
pub mod script;
pub mod stake;
pub mod store;
pub mod subsidy;
pub mod transaction;
pub mod utxo;
pub mod validate;
pub mod wire;

// Re-exports principais
pub use block::{Block, BlockHeader, BlockNonce};
pub use chain::{BlockAcceptance, ChainHandle, ChainManager, ChainNotification, ChainSnapshot};
pub use error::{DecodeError, EquihashError, PowError, Severity, StoreError, ValidationError};
pub use index::{ChainIndex, ChainNode, NodeId, NodeStatus};
pub use params::{AlgorithmId, ChainParams, Network, SubsidyParams};
pub use stake::{StakeJournal, StakeStore, StakeTx, TicketPrng};
pub use store::{KvBackend, MemoryKv, ReadTxn, WriteTxn};
pub use subsidy::SubsidyCache;
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput, TxSerializeType, TxTree};
pub use utxo::{UtxoEntry, UtxoJournal, UtxoStore, UtxoView};

// Re-exports de tipos compartilhados
pub use shared::{Amount, BlockHeight, CancelToken, Hash256};
