//! Tipos compartilhados entre módulos do nó Tessera

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Alias para identificador único de transação
pub type TxId = crate::Hash256;

/// Alias para identificador único de bloco
pub type BlockId = crate::Hash256;

/// Alias para valor monetário (atoms, 10⁻⁸ de uma moeda)
pub type Amount = i64;

/// Alias para timestamp Unix
pub type Timestamp = i64;

/// Alias para altura do bloco na blockchain
pub type BlockHeight = u32;

/// Alias para índice de saída de transação
pub type OutputIndex = u32;

/// Token de cancelamento cooperativo para operações longas de validação
///
/// Checado na fronteira de cada rodada do Equihash e entre execuções de
/// script por input. Cancelar descarta efeitos parciais; nenhum journal
/// meio-aplicado chega ao backend.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; observable by every clone of the token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Checks whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_propagates_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
