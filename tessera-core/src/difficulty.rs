//! Retarget de dificuldade de trabalho e de stake
//!
//! O retarget de trabalho é uma média exponencialmente ponderada das
//! razões tempo-real/tempo-ideal de cada janela de blocos ancestrais, em
//! ponto fixo 64.32, limitada pelo fator máximo de ajuste e pelo alvo
//! mínimo da rede. O retarget de stake usa as mesmas fórmulas sobre o
//! desvio do pool de tickets em relação ao tamanho alvo.

use primitive_types::{U256, U512};
use shared::{Amount, Hash256};

use crate::index::{ChainIndex, NodeId};
use crate::params::ChainParams;

/// Converte um alvo compacto de 4 bytes no inteiro de 256 bits
///
/// Formato compacto do Bitcoin: expoente no byte alto, mantissa de 23
/// bits, bit de sinal 0x0080_0000 (alvo negativo vale zero).
#[must_use]
pub fn compact_to_big(compact: u32) -> U256 {
    let mantissa = compact & 0x007f_ffff;
    let negative = compact & 0x0080_0000 != 0;
    let exponent = (compact >> 24) as usize;

    if negative || mantissa == 0 {
        return U256::zero();
    }
    if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3))
    }
}

/// Converte um inteiro de 256 bits na forma compacta
#[must_use]
pub fn big_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = (value.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (value.low_u64() << (8 * (3 - size))) as u32
    } else {
        ((value >> (8 * (size - 3))).low_u64()) as u32
    };

    // A mantissa é assinada; empurra um byte se o bit de sinal ficou ligado
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | ((size as u32) << 24)
}

/// Trabalho esperado para um alvo compacto: 2^256 / (alvo + 1)
#[must_use]
pub fn work_for_bits(bits: u32) -> U256 {
    let target = compact_to_big(bits);
    if target.is_zero() {
        return U256::zero();
    }
    // (~alvo / (alvo + 1)) + 1 evita o overflow de 2^256
    (!target / (target + U256::one())) + U256::one()
}

/// Interpreta um hash como inteiro de 256 bits big-endian
#[must_use]
pub fn hash_to_big(hash: &Hash256) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

/// Verifica se um hash de prova de trabalho satisfaz o alvo compacto
#[must_use]
pub fn hash_meets_target(hash: &Hash256, bits: u32, pow_limit: &U256) -> bool {
    let target = compact_to_big(bits);
    if target.is_zero() || target > *pow_limit {
        return false;
    }
    hash_to_big(hash) <= target
}

// Razões por janela em ponto fixo 64.32, ponderadas exponencialmente.
// Janelas que regridem até a gênese assumem comportamento no alvo.
fn windowed_adjustment<F>(
    index: &ChainIndex,
    prev: NodeId,
    window_size: i64,
    windows: i64,
    alpha: i64,
    mut ratio_for_window: F,
) -> i128
where
    F: FnMut(&ChainIndex, NodeId, NodeId) -> i128,
{
    let nodes_to_traverse = window_size * windows;
    let mut weighted_sum: i128 = 0;
    let mut weights: i128 = 0;

    let mut recent = prev;
    let mut old_node = prev;
    let mut window_period: i64 = 0;

    for i in 0..=nodes_to_traverse {
        if i % window_size == 0 && i != 0 {
            let shift = u32::try_from((windows - window_period) * alpha).unwrap_or(0);
            weighted_sum += ratio_for_window(index, recent, old_node) << shift;
            weights += 1i128 << shift;
            window_period += 1;
            recent = old_node;
        }
        if i == nodes_to_traverse {
            break;
        }
        if let Some(parent) = index.parent_of(old_node) {
            old_node = parent;
        }
    }

    weighted_sum / weights
}

/// Bits de dificuldade exigidos do bloco seguinte a `prev`
///
/// Fora das fronteiras de janela devolve os bits do bloco anterior.
#[must_use]
pub fn next_work_bits(index: &ChainIndex, prev: NodeId, params: &ChainParams) -> u32 {
    let prev_node = index.node(prev);
    let next_height = i64::from(prev_node.height()) + 1;
    if next_height % params.work_diff_window_size != 0 {
        return prev_node.header.bits;
    }

    let old_target = compact_to_big(prev_node.header.bits);
    if old_target.is_zero() {
        return params.pow_limit_bits;
    }

    let target_timespan = params.work_diff_window_size * params.target_time_per_block;
    let adjustment = windowed_adjustment(
        index,
        prev,
        params.work_diff_window_size,
        params.work_diff_windows,
        params.work_diff_alpha,
        |index, recent, oldest| {
            // Janela que alcançou a gênese: assume tempo exatamente no alvo
            let time_diff = if index.node(oldest).height() == 0 {
                target_timespan
            } else {
                index.node(recent).timestamp_unix() - index.node(oldest).timestamp_unix()
            };
            (i128::from(time_diff) << 32) / i128::from(target_timespan)
        },
    );

    let factor = U512::from(params.retarget_adjustment_factor);
    let min_target = U512::from(old_target) / factor;
    let max_target = U512::from(old_target) * factor;

    let next = if adjustment <= 0 {
        min_target
    } else {
        (U512::from(old_target) * U512::from(adjustment as u128)) >> 32
    };
    let next = next.clamp(min_target, max_target);
    let next = next.min(U512::from(params.pow_limit));

    let mut bytes = [0u8; 64];
    next.to_big_endian(&mut bytes);
    big_to_compact(U256::from_big_endian(&bytes[32..]))
}

/// Dificuldade de stake (preço do ticket) exigida do bloco seguinte
///
/// Média ponderada por janela da razão entre o pool de tickets observado e
/// o tamanho alvo do pool, aplicada ao preço anterior.
#[must_use]
pub fn next_stake_diff(index: &ChainIndex, prev: NodeId, params: &ChainParams) -> Amount {
    let prev_node = index.node(prev);
    let next_height = i64::from(prev_node.height()) + 1;
    if next_height % params.stake_diff_window_size != 0 {
        return prev_node.header.sbits.max(params.min_stake_diff);
    }

    let old_diff = i128::from(prev_node.header.sbits.max(params.min_stake_diff));
    let target_pool = i128::from(params.ticket_pool_size.max(1));

    let adjustment = windowed_adjustment(
        index,
        prev,
        params.stake_diff_window_size,
        params.stake_diff_windows,
        params.stake_diff_alpha,
        |index, recent, _oldest| {
            let node = index.node(recent);
            if node.header.pool_size == 0 {
                // Pool vazio (pré-votação): comporta-se como no alvo
                1i128 << 32
            } else {
                (i128::from(node.header.pool_size) << 32) / target_pool
            }
        },
    );

    let factor = i128::from(params.retarget_adjustment_factor);
    let min_diff = old_diff / factor;
    let max_diff = old_diff.saturating_mul(factor);

    let next = if adjustment <= 0 {
        min_diff
    } else {
        (old_diff * adjustment) >> 32
    };
    let next = next.clamp(min_diff, max_diff);
    Amount::try_from(next)
        .unwrap_or(Amount::MAX)
        .max(params.min_stake_diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NodeStatus;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_compact_round_trip() {
        for bits in [0x1d00_ffffu32, 0x1b04_04cb, 0x2007_ffff, 0x1810_0000] {
            let big = compact_to_big(bits);
            assert_eq!(big_to_compact(big), bits, "bits {bits:#010x}");
        }
    }

    #[test]
    fn test_compact_negative_and_zero() {
        assert_eq!(compact_to_big(0x0180_0000), U256::zero());
        assert_eq!(compact_to_big(0), U256::zero());
        assert_eq!(big_to_compact(U256::zero()), 0);
    }

    #[test]
    fn test_compact_small_exponents() {
        // expoente 1: mantissa deslocada dois bytes para baixo
        assert_eq!(compact_to_big(0x0100_1200), U256::zero());
        assert_eq!(compact_to_big(0x0212_3400), U256::from(0x12u64));
        assert_eq!(compact_to_big(0x0312_3456), U256::from(0x12_3456u64));
    }

    #[test]
    fn test_work_for_bits() {
        // alvo 2^224 - ish: trabalho ~= 2^32
        let work = work_for_bits(0x1d00_ffff);
        assert!(work > U256::from(u32::MAX / 2));
        assert_eq!(work_for_bits(0), U256::zero());

        // alvo menor (mais difícil) tem mais trabalho
        assert!(work_for_bits(0x1c00_ffff) > work);
    }

    #[test]
    fn test_hash_meets_target() {
        let params = ChainParams::simnet();
        let easy = Hash256::zero();
        assert!(hash_meets_target(&easy, params.pow_limit_bits, &params.pow_limit));

        let hard = Hash256::from_bytes([0xff; 32]);
        assert!(!hash_meets_target(&hard, params.pow_limit_bits, &params.pow_limit));
    }

    fn build_timed_chain(spacing_secs: i64, len: u32) -> (ChainIndex, Vec<NodeId>) {
        let params = ChainParams::simnet();
        let mut index = ChainIndex::new();
        let genesis = params.genesis_block.header.clone();
        let base = genesis.timestamp;
        let mut ids = vec![index.insert(genesis.clone(), None, NodeStatus::FullyValidated, 0)];
        let mut prev_hash = params.genesis_hash;

        for height in 1..=len {
            let mut header = genesis.clone();
            header.height = height;
            header.previous_hash = prev_hash;
            header.timestamp = base + Duration::seconds(spacing_secs * i64::from(height));
            prev_hash = header.hash();
            let parent = *ids.last().unwrap();
            ids.push(index.insert(header, Some(parent), NodeStatus::HeaderKnown, height.into()));
        }
        (index, ids)
    }

    #[test]
    fn test_retarget_only_at_window_boundary() {
        let params = ChainParams::simnet();
        let (index, ids) = build_timed_chain(params.target_time_per_block, 14);

        // altura seguinte 14 não é múltiplo de 8: mantém os bits
        let bits = next_work_bits(&index, ids[13], params);
        assert_eq!(bits, index.node(ids[13]).header.bits);
    }

    #[test]
    fn test_on_target_spacing_keeps_difficulty() {
        let params = ChainParams::simnet();
        let (index, ids) = build_timed_chain(params.target_time_per_block, 15);

        // altura seguinte 16 é fronteira; blocos no alvo => sem ajuste
        let bits = next_work_bits(&index, ids[15], params);
        assert_eq!(compact_to_big(bits), compact_to_big(params.pow_limit_bits));
    }

    #[test]
    fn test_fast_blocks_raise_difficulty() {
        // blocos instantâneos: o ajuste satura no fator máximo
        let params = ChainParams::simnet();
        let mut index = ChainIndex::new();
        let mut header = params.genesis_block.header.clone();
        header.bits = 0x1d00_ffff;
        let mut ids = vec![index.insert(header.clone(), None, NodeStatus::FullyValidated, 0)];
        let mut prev_hash = index.node(ids[0]).hash;
        for height in 1..=31u32 {
            let mut h = header.clone();
            h.height = height;
            h.previous_hash = prev_hash;
            // mesmo timestamp da gênese: janelas reais com duração zero
            prev_hash = h.hash();
            let parent = *ids.last().unwrap();
            ids.push(index.insert(h, Some(parent), NodeStatus::HeaderKnown, height.into()));
        }

        let bits = next_work_bits(&index, *ids.last().unwrap(), params);
        let old_target = compact_to_big(0x1d00_ffff);
        assert_eq!(
            compact_to_big(bits),
            old_target / U256::from(params.retarget_adjustment_factor)
        );
    }

    #[test]
    fn test_slow_blocks_lower_difficulty_capped_at_limit() {
        let params = ChainParams::simnet();
        let (index, ids) = build_timed_chain(params.target_time_per_block * 100, 15);

        // já estamos no pow_limit; não pode subir mais
        let bits = next_work_bits(&index, ids[15], params);
        assert_eq!(compact_to_big(bits), params.pow_limit);
    }

    #[test]
    fn test_stake_diff_floors_at_minimum() {
        let params = ChainParams::simnet();
        let (index, ids) = build_timed_chain(params.target_time_per_block, 15);

        // pool vazio nos cabeçalhos: preço fica no mínimo
        let sdiff = next_stake_diff(&index, ids[15], params);
        assert_eq!(sdiff, params.min_stake_diff);
    }

    #[test]
    fn test_stake_diff_rises_with_oversubscribed_pool() {
        let params = ChainParams::simnet();
        let mut index = ChainIndex::new();
        let genesis = params.genesis_block.header.clone();
        let base = genesis.timestamp;
        let mut ids = vec![index.insert(genesis.clone(), None, NodeStatus::FullyValidated, 0)];
        let mut prev_hash = params.genesis_hash;
        for height in 1..=15u32 {
            let mut header = genesis.clone();
            header.height = height;
            header.previous_hash = prev_hash;
            header.pool_size = params.ticket_pool_size * 3;
            header.sbits = params.min_stake_diff;
            header.timestamp = base + Duration::seconds(i64::from(height));
            prev_hash = header.hash();
            let parent = *ids.last().unwrap();
            ids.push(index.insert(header, Some(parent), NodeStatus::HeaderKnown, height.into()));
        }

        let sdiff = next_stake_diff(&index, ids[15], params);
        assert!(sdiff > params.min_stake_diff);
        assert!(sdiff <= params.min_stake_diff * params.retarget_adjustment_factor);
    }
}
