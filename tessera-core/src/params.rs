//! Parâmetros imutáveis por rede
//!
//! Nada aqui é estado global mutável: cada componente recebe um
//! `&ChainParams` na construção. As quatro redes diferem em gênese,
//! cronograma de subsídio, parâmetros de stake, altura de ativação do
//! Equihash e magics de endereço.

use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use shared::{Amount, Hash256};

use crate::block::{Block, BlockHeader, BlockNonce};
use crate::difficulty::compact_to_big;
use crate::transaction::Transaction;

/// Redes suportadas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    MainNet,
    TestNet3,
    SimNet,
    RegNet,
}

/// Algoritmo de prova de trabalho ativo numa dada altura
///
/// Conjunto fechado: a correção do consenso exige correspondência
/// exaustiva, não interfaces abertas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmId {
    /// Hash do cabeçalho direto contra o alvo (nonce de 4 bytes)
    V0,
    /// Equihash (n, k) com nonce de 32 bytes
    V1Equihash { n: u32, k: u32 },
}

impl AlgorithmId {
    /// Comprimento em bytes da solução Equihash; zero para V0
    #[must_use]
    pub const fn solution_len(&self) -> usize {
        match self {
            Self::V0 => 0,
            Self::V1Equihash { n, k } => {
                ((1usize << *k) * (*n as usize / (*k as usize + 1) + 1)) / 8
            }
        }
    }
}

/// Parâmetros do cronograma de subsídio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsidyParams {
    /// Subsídio integral do bloco 1 (premine)
    pub block_one: Amount,
    /// Subsídio base das alturas seguintes
    pub base: Amount,
    /// Multiplicador da redução exponencial
    pub mul: i64,
    /// Divisor da redução exponencial
    pub div: i64,
    /// Blocos entre reduções
    pub reduction_interval: u32,
    /// Proporção do trabalho (sobre work + vote)
    pub work_proportion: i64,
    /// Proporção dos votos
    pub vote_proportion: i64,
    /// Altura a partir da qual blocos exigem votos
    pub stake_validation_height: u32,
    /// Votos por bloco
    pub votes_per_block: u16,
}

/// Conjunto de parâmetros de uma rede
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network: Network,
    /// Magic de 4 bytes do protocolo de rede
    pub net_magic: u32,
    pub default_p2p_port: u16,
    pub default_rpc_port: u16,
    /// Magic de 2 bytes dos endereços pay-to-pubkey-hash
    pub pubkey_hash_addr_prefix: [u8; 2],
    /// Magic de 2 bytes dos endereços pay-to-script-hash
    pub script_hash_addr_prefix: [u8; 2],

    /// Alvo máximo (dificuldade mínima)
    pub pow_limit: U256,
    pub pow_limit_bits: u32,
    /// Segundos desejados entre blocos
    pub target_time_per_block: i64,
    pub work_diff_alpha: i64,
    pub work_diff_window_size: i64,
    pub work_diff_windows: i64,
    pub retarget_adjustment_factor: i64,

    pub subsidy: SubsidyParams,

    pub coinbase_maturity: u32,
    pub ticket_maturity: u32,
    pub ticket_expiry: u32,
    pub tickets_per_block: u16,
    pub ticket_pool_size: u32,
    pub min_stake_diff: Amount,
    pub stake_diff_alpha: i64,
    pub stake_diff_window_size: i64,
    pub stake_diff_windows: i64,

    /// Altura a partir da qual cabeçalhos carregam solução Equihash
    pub equihash_activation_height: u32,
    pub equihash_n: u32,
    pub equihash_k: u32,

    /// Pontos de finalidade: blocos nestas alturas têm hash fixado
    pub checkpoints: Vec<(u32, Hash256)>,

    /// Forma histórica do hashing da merkle root (folhas sem witness)
    pub legacy_merkle_hashing: bool,

    pub max_block_size: usize,
    /// Versão mínima de bloco aceite
    pub min_block_version: u32,

    pub genesis_block: Block,
    pub genesis_hash: Hash256,
}

impl ChainParams {
    /// Parâmetros da rede principal
    #[must_use]
    pub fn mainnet() -> &'static Self {
        &MAINNET
    }

    /// Parâmetros da rede de testes pública
    #[must_use]
    pub fn testnet3() -> &'static Self {
        &TESTNET3
    }

    /// Parâmetros da rede de simulação
    #[must_use]
    pub fn simnet() -> &'static Self {
        &SIMNET
    }

    /// Parâmetros da rede de regressão
    #[must_use]
    pub fn regnet() -> &'static Self {
        &REGNET
    }

    /// Algoritmo de prova de trabalho ativo na altura dada
    #[must_use]
    pub const fn algorithm_at(&self, height: u32) -> AlgorithmId {
        if height >= self.equihash_activation_height {
            AlgorithmId::V1Equihash {
                n: self.equihash_n,
                k: self.equihash_k,
            }
        } else {
            AlgorithmId::V0
        }
    }

    /// Número mínimo de votos para um bloco ser aceite
    #[must_use]
    pub const fn minimum_votes(&self) -> u16 {
        self.tickets_per_block / 2 + 1
    }

    /// Quantia máxima emitível numa única saída
    #[must_use]
    pub const fn max_amount(&self) -> Amount {
        // 2^63 - 1 é teórico; o limite prático é a emissão total
        21_000_000_000 * 100_000_000
    }
}

fn build_genesis(
    timestamp_unix: i64,
    bits: u32,
    sbits: Amount,
    legacy_merkle: bool,
) -> Block {
    // A coinbase da gênese não é gastável; o premine entra no bloco 1.
    let coinbase = Transaction::coinbase(0, 0, vec![]);

    let mut block = Block::new(
        BlockHeader {
            version: 1,
            previous_hash: Hash256::zero(),
            merkle_root: Hash256::zero(),
            stake_root: Hash256::zero(),
            vote_bits: 0,
            final_state: [0u8; 6],
            voters: 0,
            fresh_stake: 0,
            revocations: 0,
            pool_size: 0,
            bits,
            sbits,
            height: 0,
            size: 0,
            timestamp: Utc
                .timestamp_opt(timestamp_unix, 0)
                .single()
                .expect("timestamp de gênese fixo"),
            nonce: BlockNonce::V0(0),
            extra_data: [0u8; 32],
            stake_version: 0,
            equihash_solution: Vec::new(),
        },
        vec![coinbase],
        Vec::new(),
    );
    block.header.merkle_root = block.merkle_root(legacy_merkle);
    block.header.size = block.serialized_size() as u32;
    block
}

fn finish(mut params: ChainParams) -> ChainParams {
    params.genesis_hash = params.genesis_block.hash();
    // a gênese é sempre um ponto de finalidade
    params.checkpoints.insert(0, (0, params.genesis_hash));
    params
}

static MAINNET: Lazy<ChainParams> = Lazy::new(|| {
    let pow_limit_bits = 0x1d00_ffff;
    let genesis = build_genesis(1_531_731_600, pow_limit_bits, 2_0000_0000, true);
    finish(ChainParams {
        network: Network::MainNet,
        net_magic: 0x43b1_a5ce,
        default_p2p_port: 9108,
        default_rpc_port: 9109,
        pubkey_hash_addr_prefix: [0x0f, 0x21],
        script_hash_addr_prefix: [0x0f, 0x1a],
        pow_limit: compact_to_big(pow_limit_bits),
        pow_limit_bits,
        target_time_per_block: 150,
        work_diff_alpha: 1,
        work_diff_window_size: 144,
        work_diff_windows: 20,
        retarget_adjustment_factor: 4,
        subsidy: SubsidyParams {
            block_one: 168_000_000_000_000,
            base: 3_119_582_664,
            mul: 100,
            div: 101,
            reduction_interval: 16_128,
            work_proportion: 7,
            vote_proportion: 3,
            stake_validation_height: 768,
            votes_per_block: 5,
        },
        coinbase_maturity: 256,
        ticket_maturity: 256,
        ticket_expiry: 40_960,
        tickets_per_block: 5,
        ticket_pool_size: 8_192,
        min_stake_diff: 2_0000_0000,
        stake_diff_alpha: 1,
        stake_diff_window_size: 144,
        stake_diff_windows: 20,
        equihash_activation_height: 22_880,
        equihash_n: 144,
        equihash_k: 5,
        checkpoints: vec![],
        legacy_merkle_hashing: true,
        max_block_size: 1_000_000,
        min_block_version: 1,
        genesis_block: genesis,
        genesis_hash: Hash256::zero(),
    })
});

static TESTNET3: Lazy<ChainParams> = Lazy::new(|| {
    let pow_limit_bits = 0x1e00_ffff;
    let genesis = build_genesis(1_531_731_601, pow_limit_bits, 2000_0000, true);
    finish(ChainParams {
        network: Network::TestNet3,
        net_magic: 0x2c4f_8d21,
        default_p2p_port: 19_108,
        default_rpc_port: 19_109,
        pubkey_hash_addr_prefix: [0x0f, 0x01],
        script_hash_addr_prefix: [0x0e, 0xfc],
        pow_limit: compact_to_big(pow_limit_bits),
        pow_limit_bits,
        target_time_per_block: 120,
        work_diff_alpha: 1,
        work_diff_window_size: 144,
        work_diff_windows: 20,
        retarget_adjustment_factor: 4,
        subsidy: SubsidyParams {
            block_one: 168_000_000_000_000,
            base: 2_500_000_000,
            mul: 100,
            div: 101,
            reduction_interval: 2_048,
            work_proportion: 7,
            vote_proportion: 3,
            stake_validation_height: 768,
            votes_per_block: 5,
        },
        coinbase_maturity: 16,
        ticket_maturity: 16,
        ticket_expiry: 6_144,
        tickets_per_block: 5,
        ticket_pool_size: 1_024,
        min_stake_diff: 2000_0000,
        stake_diff_alpha: 1,
        stake_diff_window_size: 144,
        stake_diff_windows: 20,
        equihash_activation_height: 2_000,
        equihash_n: 200,
        equihash_k: 9,
        checkpoints: vec![],
        legacy_merkle_hashing: true,
        max_block_size: 1_000_000,
        min_block_version: 1,
        genesis_block: genesis,
        genesis_hash: Hash256::zero(),
    })
});

static SIMNET: Lazy<ChainParams> = Lazy::new(|| {
    let pow_limit_bits = 0x207f_ffff;
    let genesis = build_genesis(1_401_292_357, pow_limit_bits, 2_0000, false);
    finish(ChainParams {
        network: Network::SimNet,
        net_magic: 0x1214_1c16,
        default_p2p_port: 18_555,
        default_rpc_port: 18_556,
        pubkey_hash_addr_prefix: [0x0e, 0x91],
        script_hash_addr_prefix: [0x0e, 0x8c],
        pow_limit: compact_to_big(pow_limit_bits),
        pow_limit_bits,
        target_time_per_block: 1,
        work_diff_alpha: 1,
        work_diff_window_size: 8,
        work_diff_windows: 4,
        retarget_adjustment_factor: 4,
        subsidy: SubsidyParams {
            block_one: 5_000_000_000_000,
            base: 2_500_000_000,
            mul: 100,
            div: 101,
            reduction_interval: 128,
            work_proportion: 7,
            vote_proportion: 3,
            stake_validation_height: 48,
            votes_per_block: 5,
        },
        coinbase_maturity: 16,
        ticket_maturity: 16,
        ticket_expiry: 384,
        tickets_per_block: 5,
        ticket_pool_size: 64,
        min_stake_diff: 2_0000,
        stake_diff_alpha: 1,
        stake_diff_window_size: 8,
        stake_diff_windows: 4,
        equihash_activation_height: 1_000,
        equihash_n: 48,
        equihash_k: 5,
        checkpoints: vec![],
        legacy_merkle_hashing: false,
        max_block_size: 1_000_000,
        min_block_version: 1,
        genesis_block: genesis,
        genesis_hash: Hash256::zero(),
    })
});

static REGNET: Lazy<ChainParams> = Lazy::new(|| {
    let pow_limit_bits = 0x207f_ffff;
    let genesis = build_genesis(1_538_524_800, pow_limit_bits, 2_0000, false);
    finish(ChainParams {
        network: Network::RegNet,
        net_magic: 0x6d5e_3fae,
        default_p2p_port: 18_655,
        default_rpc_port: 18_656,
        pubkey_hash_addr_prefix: [0x0e, 0x00],
        script_hash_addr_prefix: [0x0d, 0xfb],
        pow_limit: compact_to_big(pow_limit_bits),
        pow_limit_bits,
        target_time_per_block: 1,
        work_diff_alpha: 1,
        work_diff_window_size: 8,
        work_diff_windows: 4,
        retarget_adjustment_factor: 4,
        subsidy: SubsidyParams {
            block_one: 5_000_000_000_000,
            base: 2_500_000_000,
            mul: 100,
            div: 101,
            reduction_interval: 128,
            work_proportion: 7,
            vote_proportion: 3,
            stake_validation_height: 48,
            votes_per_block: 5,
        },
        coinbase_maturity: 16,
        ticket_maturity: 16,
        ticket_expiry: 384,
        tickets_per_block: 5,
        ticket_pool_size: 64,
        min_stake_diff: 2_0000,
        stake_diff_alpha: 1,
        stake_diff_window_size: 8,
        stake_diff_windows: 4,
        equihash_activation_height: 16,
        equihash_n: 48,
        equihash_k: 5,
        checkpoints: vec![],
        legacy_merkle_hashing: false,
        max_block_size: 1_000_000,
        min_block_version: 1,
        genesis_block: genesis,
        genesis_hash: Hash256::zero(),
    })
});
