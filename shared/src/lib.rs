pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{
    sign_hash, verify_hash, KeyPair, PrivateKey, PublicKey, SignatureAlgorithm,
};
pub use error::ChainError;
pub use hash::{merkle_levels, merkle_root, Blake256, Hash256};
pub use types::{Amount, BlockHeight, BlockId, CancelToken, OutputIndex, Timestamp, TxId};

pub type Result<T> = std::result::Result<T, ChainError>;
