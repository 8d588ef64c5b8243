use thiserror::Error;

/// Erros dos primitivos compartilhados entre os módulos do nó
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Hash inválido")]
    InvalidHash,

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Tamanho de chave inválido: esperado {expected}, recebido {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("Algoritmo de assinatura desconhecido: {0}")]
    UnknownSignatureAlgorithm(u8),

    #[error("Erro criptográfico: {0}")]
    CryptographicError(String),

    #[error("Erro de serialização: {0}")]
    SerializationError(String),

    #[error("Erro de I/O: {0}")]
    IoError(String),
}
