use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChainError;

/// Hash de 256 bits usado para identificar blocos, transações e tickets
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a hash from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the BLAKE-256 hash of the provided data
    #[must_use]
    pub fn blake256(data: &[u8]) -> Self {
        let mut hasher = Blake256::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Computes BLAKE-256 twice (the full hashing form used by the
    /// witness-inclusive merkle variant)
    #[must_use]
    pub fn blake256d(data: &[u8]) -> Self {
        let first = Self::blake256(data);
        Self::blake256(first.as_bytes())
    }

    /// Parses a hash from a hexadecimal string
    ///
    /// # Errors
    ///
    /// Retorna erro se a string não for hexadecimal ou não tiver 32 bytes
    pub fn from_hex(hex_string: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(hex_string).map_err(|_| ChainError::InvalidHash)?;
        let hash: [u8; 32] = bytes.try_into().map_err(|_| ChainError::InvalidHash)?;
        Ok(Self(hash))
    }

    /// Checks whether every byte of the hash is zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Valor inicial (IV do SHA-256, conforme a especificação do BLAKE)
const IV: [u32; 8] = [
    0x6a09_e667,
    0xbb67_ae85,
    0x3c6e_f372,
    0xa54f_f53a,
    0x510e_527f,
    0x9b05_688c,
    0x1f83_d9ab,
    0x5be0_cd19,
];

// Constantes derivadas dos dígitos de pi
const U: [u32; 16] = [
    0x243f_6a88,
    0x85a3_08d3,
    0x1319_8a2e,
    0x0370_7344,
    0xa409_3822,
    0x299f_31d0,
    0x082e_fa98,
    0xec4e_6c89,
    0x4528_21e6,
    0x38d0_1377,
    0xbe54_66cf,
    0x34e9_0c6c,
    0xc0ac_29b7,
    0xc97c_50dd,
    0x3f84_d5b5,
    0xb547_0917,
];

// Permutações de mensagem; rodadas 10..13 reutilizam SIGMA[r % 10]
const SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

/// Implementação incremental do BLAKE-256 (14 rodadas, salt zero)
///
/// É a função de hash de consenso: hashes de blocos, transações, merkle
/// roots e a PRNG da loteria de tickets derivam todos daqui.
#[derive(Debug, Clone)]
pub struct Blake256 {
    h: [u32; 8],
    buf: [u8; 64],
    buf_len: usize,
    // Bits de mensagem já comprimidos (contador `t` da especificação)
    bits: u64,
}

impl Default for Blake256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Blake256 {
    /// Creates a new hasher in its initial state
    #[must_use]
    pub const fn new() -> Self {
        Self {
            h: IV,
            buf: [0u8; 64],
            buf_len: 0,
            bits: 0,
        }
    }

    /// Absorbs more message bytes
    pub fn update(&mut self, mut data: &[u8]) {
        if self.buf_len > 0 {
            let take = data.len().min(64 - self.buf_len);
            self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&data[..take]);
            self.buf_len += take;
            data = &data[take..];
            if self.buf_len == 64 {
                self.bits += 512;
                let block = self.buf;
                self.compress(&block, self.bits, false);
                self.buf_len = 0;
            }
        }
        while data.len() >= 64 {
            self.bits += 512;
            let mut block = [0u8; 64];
            block.copy_from_slice(&data[..64]);
            self.compress(&block, self.bits, false);
            data = &data[64..];
        }
        if !data.is_empty() {
            self.buf[..data.len()].copy_from_slice(data);
            self.buf_len = data.len();
        }
    }

    /// Finishes the computation and returns the digest
    #[must_use]
    pub fn finalize(mut self) -> Hash256 {
        let rem = self.buf_len;
        let total_bits = self.bits + rem as u64 * 8;

        if rem > 55 {
            // Dois blocos: o padding 0x80 ainda cabe junto da mensagem,
            // o comprimento vai num bloco só de padding (contador nulo).
            let mut block = [0u8; 64];
            block[..rem].copy_from_slice(&self.buf[..rem]);
            block[rem] = 0x80;
            self.compress(&block, total_bits, false);

            let mut last = [0u8; 64];
            last[55] = 0x01;
            last[56..].copy_from_slice(&total_bits.to_be_bytes());
            self.compress(&last, 0, true);
        } else {
            // Um bloco: 0x80, zeros, 0x01 na posição 55 (0x81 se rem == 55)
            // e o comprimento em bits big-endian.
            let mut block = [0u8; 64];
            block[..rem].copy_from_slice(&self.buf[..rem]);
            block[rem] = 0x80;
            block[55] |= 0x01;
            block[56..].copy_from_slice(&total_bits.to_be_bytes());
            let counter = if rem == 0 { 0 } else { total_bits };
            self.compress(&block, counter, rem == 0);
        }

        let mut out = [0u8; 32];
        for (i, word) in self.h.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        Hash256(out)
    }

    #[allow(clippy::many_single_char_names)]
    fn compress(&mut self, block: &[u8; 64], counter: u64, null_counter: bool) {
        let mut m = [0u32; 16];
        for (i, word) in m.iter_mut().enumerate() {
            *word = u32::from_be_bytes(block[i * 4..i * 4 + 4].try_into().expect("4 bytes"));
        }

        let (t0, t1) = if null_counter {
            (0, 0)
        } else {
            (counter as u32, (counter >> 32) as u32)
        };

        let mut v = [0u32; 16];
        v[..8].copy_from_slice(&self.h);
        v[8..12].copy_from_slice(&U[..4]);
        v[12] = t0 ^ U[4];
        v[13] = t0 ^ U[5];
        v[14] = t1 ^ U[6];
        v[15] = t1 ^ U[7];

        macro_rules! g {
            ($r:expr, $i:expr, $a:expr, $b:expr, $c:expr, $d:expr) => {
                let x = SIGMA[$r % 10][2 * $i];
                let y = SIGMA[$r % 10][2 * $i + 1];
                v[$a] = v[$a]
                    .wrapping_add(v[$b])
                    .wrapping_add(m[x] ^ U[y]);
                v[$d] = (v[$d] ^ v[$a]).rotate_right(16);
                v[$c] = v[$c].wrapping_add(v[$d]);
                v[$b] = (v[$b] ^ v[$c]).rotate_right(12);
                v[$a] = v[$a]
                    .wrapping_add(v[$b])
                    .wrapping_add(m[y] ^ U[x]);
                v[$d] = (v[$d] ^ v[$a]).rotate_right(8);
                v[$c] = v[$c].wrapping_add(v[$d]);
                v[$b] = (v[$b] ^ v[$c]).rotate_right(7);
            };
        }

        for r in 0..14 {
            g!(r, 0, 0, 4, 8, 12);
            g!(r, 1, 1, 5, 9, 13);
            g!(r, 2, 2, 6, 10, 14);
            g!(r, 3, 3, 7, 11, 15);
            g!(r, 4, 0, 5, 10, 15);
            g!(r, 5, 1, 6, 11, 12);
            g!(r, 6, 2, 7, 8, 13);
            g!(r, 7, 3, 4, 9, 14);
        }

        for i in 0..8 {
            self.h[i] ^= v[i] ^ v[i + 8];
        }
    }
}

/// Calcula a merkle root de uma sequência ordenada de hashes-folha
///
/// Cada nível combina pares com BLAKE-256(esquerda ‖ direita); um nó ímpar
/// é duplicado. Entrada vazia devolve o hash zero.
#[must_use]
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::zero();
    }
    let levels = merkle_levels(leaves);
    levels.last().and_then(|l| l.first()).copied().unwrap_or_else(Hash256::zero)
}

/// Constrói a árvore merkle completa, nível 0 (folhas) primeiro
#[must_use]
pub fn merkle_levels(leaves: &[Hash256]) -> Vec<Vec<Hash256>> {
    if leaves.is_empty() {
        return Vec::new();
    }

    let mut levels = vec![leaves.to_vec()];
    while levels.last().map_or(0, Vec::len) > 1 {
        let current = levels.last().expect("nível anterior existe");
        let mut next = Vec::with_capacity(current.len().div_ceil(2));
        for pair in current.chunks(2) {
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut data = [0u8; 64];
            data[..32].copy_from_slice(pair[0].as_bytes());
            data[32..].copy_from_slice(right.as_bytes());
            next.push(Hash256::blake256(&data));
        }
        levels.push(next);
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake256_empty_vector() {
        assert_eq!(
            Hash256::blake256(b"").to_string(),
            "716f6e863f744b9ac22c97ec7b76ea5f5908bc5b2f67c61510bfc4751384ea7a"
        );
    }

    #[test]
    fn test_blake256_one_zero_byte() {
        // Vetor de teste da submissão original do BLAKE
        assert_eq!(
            Hash256::blake256(&[0u8]).to_string(),
            "0ce8d4ef4dd7cd8d62dfded9d4edb0a774ae6a41929a74da23109e8f11139c87"
        );
    }

    #[test]
    fn test_blake256_72_zero_bytes() {
        // Mensagem que atravessa a fronteira de bloco (64 + 8 bytes)
        assert_eq!(
            Hash256::blake256(&[0u8; 72]).to_string(),
            "d419bad32d504fb7d44d460c42c5593fe544fa4c135dec31e21bd9abdcc22d41"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let one_shot = Hash256::blake256(&data);

        let mut hasher = Blake256::new();
        for chunk in data.chunks(17) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize(), one_shot);
    }

    #[test]
    fn test_merkle_empty_is_zero() {
        assert_eq!(merkle_root(&[]), Hash256::zero());
    }

    #[test]
    fn test_merkle_single_leaf_is_identity() {
        let leaf = Hash256::blake256(b"folha");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_merkle_odd_leaf_duplication() {
        let a = Hash256::blake256(b"a");
        let b = Hash256::blake256(b"b");
        let c = Hash256::blake256(b"c");

        // Com três folhas, a terceira é pareada consigo mesma
        let root = merkle_root(&[a, b, c]);
        let root_dup = merkle_root(&[a, b, c, c]);
        assert_eq!(root, root_dup);
    }

    #[test]
    fn test_merkle_levels_shape() {
        let leaves: Vec<Hash256> = (0u8..5)
            .map(|i| Hash256::blake256(&[i]))
            .collect();
        let levels = merkle_levels(&leaves);

        assert_eq!(levels.len(), 4); // 5 -> 3 -> 2 -> 1
        assert_eq!(levels[0].len(), 5);
        assert_eq!(levels[3].len(), 1);
        assert_eq!(levels[3][0], merkle_root(&leaves));
    }

    #[test]
    fn test_hash_hex_round_trip() {
        let hash = Hash256::blake256(b"round trip");
        let parsed = Hash256::from_hex(&hash.to_string()).unwrap();
        assert_eq!(hash, parsed);

        assert!(Hash256::from_hex("zz").is_err());
        assert!(Hash256::from_hex("abcd").is_err());
    }
}
