//! Índice em memória dos cabeçalhos conhecidos
//!
//! DAG de cabeçalhos em arena: cada nó é endereçado por um índice estável
//! de 64 bits, o pai é um índice e os filhos uma lista compacta de
//! índices. A arena é dona de tudo; não há ciclos de posse.

use primitive_types::U256;
use shared::Hash256;
use std::collections::HashMap;

use crate::block::BlockHeader;
use crate::difficulty::work_for_bits;

/// Endereço estável de um nó na arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

/// Estado de validação de um bloco no índice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Cabeçalho admitido (passou as fases 1 e 2)
    HeaderKnown,
    /// Bloco completo disponível, ainda não ligado à cadeia principal
    Downloaded,
    /// Fase 3 concluída com sucesso em algum momento
    FullyValidated,
    /// Falhou a fase 3; revalidável se o contexto mudar
    InvalidBlock,
    /// Permanentemente inválido
    Invalid,
    /// Um ancestral é permanentemente inválido
    InvalidAncestor,
}

impl NodeStatus {
    /// Nó que nunca pode entrar na cadeia principal
    #[must_use]
    pub const fn is_permanently_invalid(self) -> bool {
        matches!(self, Self::Invalid | Self::InvalidAncestor)
    }
}

/// Nó do índice de cadeia
#[derive(Debug, Clone)]
pub struct ChainNode {
    pub hash: Hash256,
    pub header: BlockHeader,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Trabalho acumulado: trabalho do pai + 2^256 / (alvo + 1)
    pub cum_work: U256,
    pub status: NodeStatus,
    pub in_main_chain: bool,
    /// Número de sequência de receção, para desempate determinístico
    pub seq: u64,
}

impl ChainNode {
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.header.height
    }

    #[must_use]
    pub fn timestamp_unix(&self) -> i64 {
        self.header.timestamp.timestamp()
    }
}

/// Arena de nós indexada por hash
#[derive(Debug, Default)]
pub struct ChainIndex {
    arena: Vec<ChainNode>,
    by_hash: HashMap<Hash256, NodeId>,
}

impl ChainIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Número de nós conhecidos
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Insere um cabeçalho ligado ao pai dado
    ///
    /// O trabalho acumulado é derivado dos bits do próprio cabeçalho.
    pub fn insert(
        &mut self,
        header: BlockHeader,
        parent: Option<NodeId>,
        status: NodeStatus,
        seq: u64,
    ) -> NodeId {
        let hash = header.hash();
        let parent_work = parent.map_or_else(U256::zero, |p| self.node(p).cum_work);
        let cum_work = parent_work + work_for_bits(header.bits);

        let id = NodeId(self.arena.len() as u64);
        self.arena.push(ChainNode {
            hash,
            header,
            parent,
            children: Vec::new(),
            cum_work,
            status,
            in_main_chain: false,
            seq,
        });
        if let Some(parent_id) = parent {
            self.node_mut(parent_id).children.push(id);
        }
        self.by_hash.insert(hash, id);
        id
    }

    /// Procura um nó pelo hash do bloco
    #[must_use]
    pub fn get(&self, hash: &Hash256) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    /// Acede a um nó pelo índice
    ///
    /// # Panics
    ///
    /// Entra em pânico com um `NodeId` forjado; índices emitidos por
    /// `insert` são sempre válidos.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &ChainNode {
        &self.arena[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ChainNode {
        &mut self.arena[id.0 as usize]
    }

    /// Pai de um nó
    #[must_use]
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Ancestral do nó na altura dada (o próprio nó se a altura coincidir)
    #[must_use]
    pub fn ancestor_at(&self, id: NodeId, height: u32) -> Option<NodeId> {
        let mut current = id;
        loop {
            let node = self.node(current);
            if node.height() == height {
                return Some(current);
            }
            if node.height() < height {
                return None;
            }
            current = node.parent?;
        }
    }

    /// Menor ancestral comum de dois nós
    #[must_use]
    pub fn lowest_common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let height = self.node(a).height().min(self.node(b).height());
        let mut a = self.ancestor_at(a, height)?;
        let mut b = self.ancestor_at(b, height)?;
        while a != b {
            a = self.node(a).parent?;
            b = self.node(b).parent?;
        }
        Some(a)
    }

    /// Mediana dos timestamps dos últimos 11 blocos terminando no nó dado
    #[must_use]
    pub fn median_time_past(&self, id: NodeId) -> i64 {
        let mut timestamps = Vec::with_capacity(11);
        let mut current = Some(id);
        while let Some(node_id) = current {
            if timestamps.len() == 11 {
                break;
            }
            let node = self.node(node_id);
            timestamps.push(node.timestamp_unix());
            current = node.parent;
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }

    /// Marca um nó permanentemente inválido e propaga aos descendentes
    pub fn mark_invalid(&mut self, id: NodeId) {
        self.node_mut(id).status = NodeStatus::Invalid;
        let mut stack: Vec<NodeId> = self.node(id).children.clone();
        while let Some(child) = stack.pop() {
            let node = self.node_mut(child);
            node.status = NodeStatus::InvalidAncestor;
            stack.extend(node.children.iter().copied());
        }
    }

    /// Caminho do nó `from` (exclusivo) até ao descendente `to` (inclusivo)
    ///
    /// Os nós são devolvidos por altura crescente.
    #[must_use]
    pub fn path_between(&self, from: NodeId, to: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = to;
        while current != from {
            path.push(current);
            match self.node(current).parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Itera os nós por ordem de inserção
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ChainNode)> {
        self.arena
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u64), node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ChainParams;
    use chrono::{Duration, TimeZone, Utc};

    fn chain_of(index: &mut ChainIndex, len: u32) -> Vec<NodeId> {
        let params = ChainParams::simnet();
        let genesis = params.genesis_block.header.clone();
        let mut ids = vec![index.insert(genesis.clone(), None, NodeStatus::FullyValidated, 0)];
        let mut prev_hash = genesis.hash();

        for height in 1..=len {
            let mut header = genesis.clone();
            header.height = height;
            header.previous_hash = prev_hash;
            header.timestamp =
                Utc.timestamp_opt(1_401_292_357, 0).unwrap() + Duration::seconds(i64::from(height));
            prev_hash = header.hash();
            let parent = *ids.last().unwrap();
            ids.push(index.insert(header, Some(parent), NodeStatus::HeaderKnown, height.into()));
        }
        ids
    }

    #[test]
    fn test_cumulative_work_is_monotone() {
        let mut index = ChainIndex::new();
        let ids = chain_of(&mut index, 5);
        for pair in ids.windows(2) {
            let parent = index.node(pair[0]);
            let child = index.node(pair[1]);
            assert_eq!(
                child.cum_work,
                parent.cum_work + work_for_bits(child.header.bits)
            );
        }
    }

    #[test]
    fn test_ancestor_walk_and_lca() {
        let mut index = ChainIndex::new();
        let ids = chain_of(&mut index, 8);

        assert_eq!(index.ancestor_at(ids[8], 3), Some(ids[3]));
        assert_eq!(index.ancestor_at(ids[3], 8), None);

        // ramo lateral a partir da altura 4
        let mut side = index.node(ids[4]).header.clone();
        side.height = 5;
        side.previous_hash = index.node(ids[4]).hash;
        side.vote_bits = 0xbeef;
        let side_id = index.insert(side, Some(ids[4]), NodeStatus::HeaderKnown, 99);

        assert_eq!(index.lowest_common_ancestor(ids[8], side_id), Some(ids[4]));
        assert_eq!(index.path_between(ids[4], ids[7]), vec![ids[5], ids[6], ids[7]]);
    }

    #[test]
    fn test_median_time_past() {
        let mut index = ChainIndex::new();
        let ids = chain_of(&mut index, 12);

        // mediana dos 11 últimos: timestamps base+2..base+12 -> base+7
        let expected = 1_401_292_357 + 7;
        assert_eq!(index.median_time_past(ids[12]), expected);

        // perto da gênese usa os que existem
        assert_eq!(index.median_time_past(ids[2]), 1_401_292_357 + 1);
    }

    #[test]
    fn test_mark_invalid_cascades() {
        let mut index = ChainIndex::new();
        let ids = chain_of(&mut index, 4);

        index.mark_invalid(ids[2]);
        assert_eq!(index.node(ids[2]).status, NodeStatus::Invalid);
        assert_eq!(index.node(ids[3]).status, NodeStatus::InvalidAncestor);
        assert_eq!(index.node(ids[4]).status, NodeStatus::InvalidAncestor);
        assert!(index.node(ids[4]).status.is_permanently_invalid());
        assert_eq!(index.node(ids[1]).status, NodeStatus::HeaderKnown);
    }
}
