//! Cálculo de subsídios de bloco com redução exponencial
//!
//! O subsídio integral de cada intervalo é `base * (mul/div)^(h/intervalo)`
//! calculado por multiplicação-e-divisão inteira iterada, exatamente como
//! a implementação de referência, e memoizado por índice de intervalo.

use shared::Amount;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::params::SubsidyParams;

/// Cache de subsídios por intervalo de redução
///
/// As adições à cache são protegidas por mutex; consultas concorrentes a
/// partir de validadores paralelos são seguras.
#[derive(Debug)]
pub struct SubsidyCache {
    params: SubsidyParams,
    by_interval: Mutex<HashMap<u32, Amount>>,
}

impl SubsidyCache {
    /// Cria uma cache para o cronograma dado
    #[must_use]
    pub fn new(params: SubsidyParams) -> Self {
        Self {
            params,
            by_interval: Mutex::new(HashMap::new()),
        }
    }

    /// Parâmetros do cronograma
    #[must_use]
    pub const fn params(&self) -> &SubsidyParams {
        &self.params
    }

    /// Subsídio integral do bloco na altura dada
    ///
    /// Altura 0 (gênese) não emite; altura 1 emite o subsídio fixo do
    /// bloco um.
    #[must_use]
    pub fn full_subsidy(&self, height: u32) -> Amount {
        if height == 0 {
            return 0;
        }
        if height == 1 {
            return self.params.block_one;
        }

        let interval = height / self.params.reduction_interval;
        if let Some(&cached) = self
            .by_interval
            .lock()
            .expect("mutex da cache de subsídios")
            .get(&interval)
        {
            return cached;
        }

        let mut subsidy = self.params.base;
        for _ in 0..interval {
            subsidy = subsidy * self.params.mul / self.params.div;
            if subsidy == 0 {
                break;
            }
        }

        self.by_interval
            .lock()
            .expect("mutex da cache de subsídios")
            .insert(interval, subsidy);
        subsidy
    }

    /// Subsídio de trabalho do bloco na altura dada
    ///
    /// A partir da altura de validação de stake o valor é escalado pelo
    /// número de votos incluídos sobre os votos por bloco.
    #[must_use]
    pub fn work_subsidy(&self, height: u32, num_votes: u16, dcp0010_active: bool) -> Amount {
        if height <= 1 {
            return self.full_subsidy(height);
        }

        let full = self.full_subsidy(height);
        let work = if dcp0010_active {
            full / 10
        } else {
            let total = self.params.work_proportion + self.params.vote_proportion;
            full * self.params.work_proportion / total
        };

        if height < self.params.stake_validation_height {
            return work;
        }
        work * Amount::from(num_votes) / Amount::from(self.params.votes_per_block)
    }

    /// Subsídio de um voto na altura dada
    ///
    /// Zero antes da janela de um bloco que antecede o arranque da
    /// votação.
    #[must_use]
    pub fn vote_subsidy(&self, height: u32, dcp0010_active: bool) -> Amount {
        if height + 1 < self.params.stake_validation_height {
            return 0;
        }

        let full = self.full_subsidy(height);
        let vote_total = if dcp0010_active {
            full * 8 / 10
        } else {
            let total = self.params.work_proportion + self.params.vote_proportion;
            full * self.params.vote_proportion / total
        };
        vote_total / Amount::from(self.params.votes_per_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ChainParams;
    use std::sync::Arc;

    fn mainnet_cache() -> SubsidyCache {
        SubsidyCache::new(ChainParams::mainnet().subsidy.clone())
    }

    #[test]
    fn test_block_zero_and_one() {
        let cache = mainnet_cache();
        assert_eq!(cache.full_subsidy(0), 0);
        assert_eq!(cache.full_subsidy(1), 168_000_000_000_000);
        assert_eq!(cache.work_subsidy(1, 0, false), 168_000_000_000_000);
        assert_eq!(cache.vote_subsidy(1, false), 0);
    }

    #[test]
    fn test_first_reduction_values() {
        let cache = mainnet_cache();
        assert_eq!(cache.full_subsidy(16_128), 3_088_695_706);
        assert_eq!(cache.work_subsidy(16_128, 5, false), 2_162_086_994);
        assert_eq!(cache.vote_subsidy(16_128, false), 185_321_742);
    }

    #[test]
    fn test_subsidy_before_first_reduction() {
        let cache = mainnet_cache();
        assert_eq!(cache.full_subsidy(2), 3_119_582_664);
        assert_eq!(cache.full_subsidy(16_127), 3_119_582_664);
    }

    #[test]
    fn test_monotone_non_increasing() {
        let cache = mainnet_cache();
        let mut previous = cache.full_subsidy(2);
        for interval in 1..64u32 {
            let height = interval * 16_128;
            let current = cache.full_subsidy(height);
            assert!(current <= previous, "intervalo {interval}");
            previous = current;
        }
    }

    #[test]
    fn test_total_emission_converges() {
        let params = ChainParams::mainnet();
        let cache = mainnet_cache();
        let interval = params.subsidy.reduction_interval;
        let svh = params.subsidy.stake_validation_height;
        let votes = Amount::from(params.subsidy.votes_per_block);

        // Emissão por bloco: trabalho sempre, votos a partir da altura de
        // validação de stake; soma fechada por intervalo de redução.
        let mut total: Amount = cache.full_subsidy(1);

        // intervalo 0 (alturas 2..intervalo), com a fronteira de votação
        let work0 = cache.work_subsidy(2, 5, false);
        let vote0 = cache.vote_subsidy(svh, false);
        total += Amount::from(interval - 2) * work0;
        total += Amount::from(interval - svh) * votes * vote0;

        // intervalos seguintes até o subsídio se esgotar
        let mut r = 1u32;
        loop {
            let height = r * interval;
            if cache.full_subsidy(height) == 0 {
                break;
            }
            let per_block = cache.work_subsidy(height, 5, false)
                + votes * cache.vote_subsidy(height, false);
            total += Amount::from(interval) * per_block;
            r += 1;
        }

        assert_eq!(total, 5_248_850_881_657_936);
    }

    #[test]
    fn test_dcp0010_split() {
        let cache = mainnet_cache();
        let full = cache.full_subsidy(16_128);
        assert_eq!(cache.work_subsidy(16_128, 5, true), full / 10);
        assert_eq!(cache.vote_subsidy(16_128, true), full * 8 / 10 / 5);
    }

    #[test]
    fn test_vote_window_one_block_early() {
        let cache = mainnet_cache();
        let svh = ChainParams::mainnet().subsidy.stake_validation_height;
        assert_eq!(cache.vote_subsidy(svh - 2, false), 0);
        assert!(cache.vote_subsidy(svh - 1, false) > 0);
        assert!(cache.vote_subsidy(svh, false) > 0);
    }

    #[test]
    fn test_concurrent_lookups() {
        let cache = Arc::new(mainnet_cache());
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..32u32 {
                    let height = (t * 32 + i) * 16_128;
                    let a = cache.full_subsidy(height);
                    let b = cache.full_subsidy(height);
                    assert_eq!(a, b);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
