//! Verificador de soluções Equihash
//!
//! Parametrizado por (n, k) com n múltiplo de 8 e k < n. O nó apenas
//! verifica soluções; resolver é trabalho dos mineradores. A geração de
//! linhas usa BLAKE2b personalizado de comprimento variável; a estrutura
//! da solução é validada por k rodadas de recombinação por XOR.

use shared::CancelToken;

use crate::error::{EquihashError, PowError, ValidationError};

/// Prefixo da personalização do BLAKE2b; completado com LE32(n) ‖ LE32(k)
const PERSONAL_PREFIX: &[u8; 7] = b"TessPoW";

/// Pares (n, k) aceites pelas redes definidas
pub const SUPPORTED_PARAMS: [(u32, u32); 4] = [(48, 5), (96, 5), (144, 5), (200, 9)];

/// Verificador para um par (n, k) fixo
#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    n: u32,
    k: u32,
}

impl Verifier {
    /// Cria um verificador para os parâmetros dados
    ///
    /// # Panics
    ///
    /// Entra em pânico com parâmetros fora do conjunto suportado; os
    /// pares vêm da tabela fechada de algoritmos por rede.
    #[must_use]
    pub fn new(n: u32, k: u32) -> Self {
        assert!(
            SUPPORTED_PARAMS.contains(&(n, k)),
            "parâmetros equihash não suportados: ({n}, {k})"
        );
        Self { n, k }
    }

    /// Bits por índice: n/(k+1) + 1
    #[must_use]
    pub const fn index_bits(&self) -> usize {
        (self.n / (self.k + 1) + 1) as usize
    }

    /// Bits de colisão zerados por rodada
    #[must_use]
    pub const fn collision_bits(&self) -> usize {
        (self.n / (self.k + 1)) as usize
    }

    /// Comprimento esperado da solução em bytes
    #[must_use]
    pub const fn solution_len(&self) -> usize {
        ((1usize << self.k) * self.index_bits()) / 8
    }

    /// Índices extraídos de cada saída do BLAKE2b
    #[must_use]
    pub const fn indices_per_hash(&self) -> usize {
        (512 / self.n) as usize
    }

    fn hash_output_len(&self) -> usize {
        self.indices_per_hash() * self.n as usize / 8
    }

    fn personal(&self) -> [u8; 16] {
        let mut personal = [0u8; 16];
        personal[..7].copy_from_slice(PERSONAL_PREFIX);
        personal[7..11].copy_from_slice(&self.n.to_le_bytes());
        personal[11..15].copy_from_slice(&self.k.to_le_bytes());
        personal
    }

    /// Linha de n/8 bytes correspondente a um índice da solução
    #[must_use]
    pub fn index_row(&self, input: &[u8], nonce: &[u8], index: u32) -> Vec<u8> {
        let group = index as usize / self.indices_per_hash();
        let digest = blake2b_simd::Params::new()
            .hash_length(self.hash_output_len())
            .personal(&self.personal())
            .to_state()
            .update(input)
            .update(nonce)
            .update(&(group as u32).to_le_bytes())
            .finalize();

        let row_len = self.n as usize / 8;
        let offset = (index as usize % self.indices_per_hash()) * row_len;
        digest.as_bytes()[offset..offset + row_len].to_vec()
    }

    /// Valida uma solução contra o material de cabeçalho e o nonce
    ///
    /// O token de cancelamento é consultado na fronteira de cada rodada.
    ///
    /// # Errors
    ///
    /// Devolve o sub-tipo de falha Equihash, ou `Cancelled`.
    pub fn verify(
        &self,
        input: &[u8],
        nonce: &[u8],
        solution: &[u8],
        cancel: &CancelToken,
    ) -> Result<(), ValidationError> {
        if solution.len() != self.solution_len() {
            return Err(equihash_err(EquihashError::InvalidSolutionLen));
        }

        let indices = unpack_indices(solution, self.index_bits());
        debug_assert_eq!(indices.len(), 1 << self.k);

        if cancel.is_cancelled() {
            return Err(ValidationError::Cancelled);
        }

        // Linhas folha; cada uma transporta o índice da folha mais à
        // esquerda da sua subárvore para o teste de ordem canónica.
        let mut rows: Vec<(Vec<u8>, u32)> = indices
            .iter()
            .map(|&index| (self.index_row(input, nonce, index), index))
            .collect();

        let cbits = self.collision_bits();
        for round in 1..=self.k as usize {
            if cancel.is_cancelled() {
                return Err(ValidationError::Cancelled);
            }

            let mut next = Vec::with_capacity(rows.len() / 2);
            for pair in rows.chunks(2) {
                let (left, right) = (&pair[0], &pair[1]);
                let xor: Vec<u8> = left
                    .0
                    .iter()
                    .zip(&right.0)
                    .map(|(a, b)| a ^ b)
                    .collect();

                // Os primeiros round*cbits bits do XOR têm de ser zero
                if !leading_bits_zero(&xor, round * cbits) {
                    let err = if round == self.k as usize {
                        EquihashError::NonZeroXor
                    } else {
                        EquihashError::InvalidCollisionLength
                    };
                    return Err(equihash_err(err));
                }

                // Subárvores idênticas anulam o XOR inteiro: solução
                // degenerada, rejeitada antes dos testes de estrutura
                if round < self.k as usize && xor.iter().all(|&b| b == 0) {
                    return Err(equihash_err(EquihashError::NonZeroXor));
                }

                if left.1 >= right.1 {
                    return Err(equihash_err(EquihashError::IncorrectOrder));
                }

                next.push((xor, left.1));
            }
            rows = next;
        }

        // A última rodada reduz tudo a uma linha totalmente nula
        debug_assert_eq!(rows.len(), 1);
        if rows[0].0.iter().any(|&b| b != 0) {
            return Err(equihash_err(EquihashError::NonZeroXor));
        }

        if !indices_distinct(&indices) {
            return Err(equihash_err(EquihashError::DuplicateIndices));
        }

        Ok(())
    }
}

const fn equihash_err(err: EquihashError) -> ValidationError {
    ValidationError::Pow(PowError::Equihash(err))
}

/// Desempacota índices big-endian de largura fixa em bits
fn unpack_indices(data: &[u8], bit_len: usize) -> Vec<u32> {
    let count = data.len() * 8 / bit_len;
    let mut indices = Vec::with_capacity(count);
    let mut acc: u64 = 0;
    let mut acc_bits = 0usize;

    for &byte in data {
        acc = (acc << 8) | u64::from(byte);
        acc_bits += 8;
        while acc_bits >= bit_len && indices.len() < count {
            let shift = acc_bits - bit_len;
            indices.push(((acc >> shift) & ((1u64 << bit_len) - 1)) as u32);
            acc_bits -= bit_len;
            acc &= (1u64 << acc_bits).wrapping_sub(1);
        }
    }
    indices
}

/// Empacota índices na representação big-endian de largura fixa
#[must_use]
pub fn pack_indices(indices: &[u32], bit_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len() * bit_len / 8);
    let mut acc: u64 = 0;
    let mut acc_bits = 0usize;

    for &index in indices {
        acc = (acc << bit_len) | u64::from(index);
        acc_bits += bit_len;
        while acc_bits >= 8 {
            out.push(((acc >> (acc_bits - 8)) & 0xff) as u8);
            acc_bits -= 8;
        }
    }
    if acc_bits > 0 {
        out.push(((acc << (8 - acc_bits)) & 0xff) as u8);
    }
    out
}

fn leading_bits_zero(bytes: &[u8], bits: usize) -> bool {
    let full = bits / 8;
    if bytes[..full].iter().any(|&b| b != 0) {
        return false;
    }
    let rem = bits % 8;
    if rem == 0 {
        return true;
    }
    bytes[full] >> (8 - rem) == 0
}

fn indices_distinct(indices: &[u32]) -> bool {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.windows(2).all(|w| w[0] != w[1])
}
