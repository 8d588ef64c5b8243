//! Seleção da melhor cadeia e reorganização
//!
//! Um único escritor é dono do índice, do conjunto de UTXOs e do estado
//! de stake: as submissões entram numa fila limitada e um worker drena-as
//! sequencialmente, o que torna a reorganização atómica sem locks
//! distribuídos. Leitores obtêm snapshots versionados que permanecem
//! válidos depois de escritas posteriores.

use primitive_types::U256;
use shared::{Amount, CancelToken, Hash256};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{sync_channel, Receiver, Sender, SyncSender};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::error::{Severity, StoreError, ValidationError};
use crate::index::{ChainIndex, NodeId, NodeStatus};
use crate::params::ChainParams;
use crate::stake::{StakeStore, StakeView};
use crate::store::{
    KvBackend, BUCKET_BEST_CHAIN, BUCKET_BLOCKS, BUCKET_BLOCK_INDEX, BUCKET_META, KEY_TIP,
};
use crate::subsidy::SubsidyCache;
use crate::utxo::{UtxoStore, UtxoView};
use crate::validate::{check_block_sanity, check_header_context, connect_block, BlockJournal};

/// Capacidade da fila de submissão
const SUBMISSION_QUEUE_DEPTH: usize = 64;

/// Capacidade do pool de órfãos
const MAX_ORPHANS: usize = 128;

/// Resultado da aceitação de um bloco
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockAcceptance {
    /// Pai desconhecido; bloco guardado à espera dele
    Orphan,
    /// Já conhecido (na cadeia, em ramo lateral ou no pool de órfãos)
    AlreadyKnown,
    /// Aceite num ramo lateral sem trabalho suficiente
    SideChain,
    /// Estendeu a cadeia principal
    Extended,
    /// Tornou-se o novo tip por reorganização
    Reorganized { detached: u32, attached: u32 },
}

/// Notificações publicadas pelo gestor de cadeia
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainNotification {
    BlockConnected { hash: Hash256, height: u32 },
    BlockDisconnected { hash: Hash256, height: u32 },
    TipChanged { hash: Hash256, height: u32 },
    Reorganized { old_tip: Hash256, new_tip: Hash256 },
}

/// Snapshot consistente do estado da cadeia principal
#[derive(Debug, Clone)]
pub struct ChainSnapshot {
    pub tip_hash: Hash256,
    pub height: u32,
    pub bits: u32,
    pub sbits: Amount,
    pub cum_work: U256,
    pub utxo: UtxoView,
    pub stake: StakeView,
}

// Pool de órfãos limitado com despejo do mais antigo
#[derive(Debug, Default)]
struct OrphanPool {
    blocks: HashMap<Hash256, Block>,
    by_parent: HashMap<Hash256, Vec<Hash256>>,
    arrival: VecDeque<Hash256>,
}

impl OrphanPool {
    fn contains(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    fn insert(&mut self, block: Block) {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return;
        }
        while self.blocks.len() >= MAX_ORPHANS {
            let Some(oldest) = self.arrival.pop_front() else {
                break;
            };
            if let Some(evicted) = self.blocks.remove(&oldest) {
                let parent = evicted.header.previous_hash;
                if let Some(children) = self.by_parent.get_mut(&parent) {
                    children.retain(|h| *h != oldest);
                }
            }
        }
        self.by_parent
            .entry(block.header.previous_hash)
            .or_default()
            .push(hash);
        self.arrival.push_back(hash);
        self.blocks.insert(hash, block);
    }

    // Retira os órfãos que aguardavam pelo pai dado
    fn take_children(&mut self, parent: &Hash256) -> Vec<Block> {
        let hashes = self.by_parent.remove(parent).unwrap_or_default();
        hashes
            .into_iter()
            .filter_map(|hash| {
                self.arrival.retain(|h| *h != hash);
                self.blocks.remove(&hash)
            })
            .collect()
    }
}

/// Motor de seleção de cadeia; detentor único do estado escrevível
pub struct ChainManager {
    params: Arc<ChainParams>,
    kv: Arc<dyn KvBackend>,
    index: ChainIndex,
    utxo: UtxoStore,
    stake: StakeStore,
    subsidy: SubsidyCache,
    tip: NodeId,
    // Blocos completos e journals dos blocos conectados
    blocks: HashMap<Hash256, Block>,
    journals: HashMap<Hash256, BlockJournal>,
    orphans: OrphanPool,
    seq: u64,
    snapshot: Arc<RwLock<Arc<ChainSnapshot>>>,
    subscribers: Vec<Sender<ChainNotification>>,
    cancel: CancelToken,
}

impl ChainManager {
    /// Cria o gestor com a gênese da rede como tip
    ///
    /// # Errors
    ///
    /// Propaga falhas de persistência da gênese
    pub fn new(params: Arc<ChainParams>, kv: Arc<dyn KvBackend>) -> Result<Self, ValidationError> {
        let mut index = ChainIndex::new();
        let genesis = params.genesis_block.clone();
        let genesis_hash = params.genesis_hash;
        let tip = index.insert(genesis.header.clone(), None, NodeStatus::FullyValidated, 0);
        index.node_mut(tip).in_main_chain = true;

        let utxo = UtxoStore::new();
        let stake = StakeStore::new();
        let subsidy = SubsidyCache::new(params.subsidy.clone());

        let snapshot = Arc::new(RwLock::new(Arc::new(ChainSnapshot {
            tip_hash: genesis_hash,
            height: 0,
            bits: genesis.header.bits,
            sbits: genesis.header.sbits,
            cum_work: index.node(tip).cum_work,
            utxo: utxo.snapshot(),
            stake: stake.snapshot(),
        })));

        let mut manager = Self {
            params,
            kv,
            index,
            utxo,
            stake,
            subsidy,
            tip,
            blocks: HashMap::new(),
            journals: HashMap::new(),
            orphans: OrphanPool::default(),
            seq: 0,
            snapshot,
            subscribers: Vec::new(),
            cancel: CancelToken::new(),
        };

        // persiste a gênese
        let mut txn = manager.kv.begin_write();
        txn.put(BUCKET_BLOCKS, genesis_hash.as_bytes(), &genesis.encode())?;
        txn.put(BUCKET_META, KEY_TIP, genesis_hash.as_bytes())?;
        txn.put(
            BUCKET_BEST_CHAIN,
            &0u32.to_be_bytes(),
            genesis_hash.as_bytes(),
        )?;
        txn.put(
            BUCKET_BLOCK_INDEX,
            &node_index_key(0, &genesis_hash),
            &node_index_value(manager.index.node(manager.tip)),
        )?;
        txn.commit()?;

        manager.blocks.insert(genesis_hash, genesis);
        Ok(manager)
    }

    /// Parâmetros da rede ativa
    #[must_use]
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Hash do tip corrente
    #[must_use]
    pub fn tip_hash(&self) -> Hash256 {
        self.index.node(self.tip).hash
    }

    /// Altura do tip corrente
    #[must_use]
    pub fn tip_height(&self) -> u32 {
        self.index.node(self.tip).height()
    }

    /// Snapshot consistente do estado corrente
    #[must_use]
    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        Arc::clone(&self.snapshot.read().expect("lock de snapshot"))
    }

    /// Estado de validação de um bloco conhecido
    #[must_use]
    pub fn block_status(&self, hash: &Hash256) -> Option<NodeStatus> {
        self.index.get(hash).map(|id| self.index.node(id).status)
    }

    /// Verifica se um bloco está na cadeia principal corrente
    #[must_use]
    pub fn is_on_main_chain(&self, hash: &Hash256) -> bool {
        self.index
            .get(hash)
            .is_some_and(|id| self.index.node(id).in_main_chain)
    }

    /// Regista um subscritor de notificações
    pub fn subscribe(&mut self) -> Receiver<ChainNotification> {
        let (sender, receiver) = std::sync::mpsc::channel();
        self.subscribers.push(sender);
        receiver
    }

    /// Token que cancela validações em curso
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn notify(&mut self, notification: &ChainNotification) {
        self.subscribers
            .retain(|sub| sub.send(notification.clone()).is_ok());
    }

    /// Processa um bloco completo submetido por um par ou pelo RPC
    ///
    /// # Errors
    ///
    /// Devolve o erro de validação; o estado da cadeia fica inalterado em
    /// qualquer falha.
    pub fn process_block(&mut self, block: Block) -> Result<BlockAcceptance, ValidationError> {
        let hash = block.hash();

        if let Some(existing) = self.index.get(&hash) {
            let status = self.index.node(existing).status;
            debug!(%hash, ?status, "bloco já conhecido");
            return Ok(BlockAcceptance::AlreadyKnown);
        }
        if self.orphans.contains(&hash) {
            return Ok(BlockAcceptance::AlreadyKnown);
        }
        if self.cancel.is_cancelled() {
            return Err(ValidationError::Cancelled);
        }

        // fase 1: sem contexto; cada bloco usa um token derivado para que
        // uma falha de script não envenene as validações seguintes
        let block_cancel = CancelToken::new();
        check_block_sanity(&block, &self.params, &block_cancel)?;

        // pai desconhecido: órfão recuperável
        let Some(parent) = self.index.get(&block.header.previous_hash) else {
            info!(%hash, parent = %block.header.previous_hash, "órfão em espera");
            self.orphans.insert(block);
            return Ok(BlockAcceptance::Orphan);
        };

        // fase 2: contexto do cabeçalho; a falha fixa o cabeçalho como
        // inválido no índice e contamina descendentes futuros
        if let Err(err) = check_header_context(&block.header, &self.index, parent, &self.params) {
            if err.severity() == Severity::InvalidHeader {
                let seq = self.next_seq();
                let node = self.index.insert(
                    block.header.clone(),
                    Some(parent),
                    NodeStatus::Invalid,
                    seq,
                );
                self.index.mark_invalid(node);
                self.persist_node_status(node)?;
            }
            return Err(err);
        }

        let seq = self.next_seq();
        let node = self.index.insert(
            block.header.clone(),
            Some(parent),
            NodeStatus::Downloaded,
            seq,
        );
        self.persist_block(&block, node)?;
        self.blocks.insert(hash, block);

        let acceptance = self.evaluate_candidate(node)?;

        // órfãos que aguardavam por este bloco tentam de novo
        for orphan in self.orphans.take_children(&hash) {
            let orphan_hash = orphan.hash();
            match self.process_block(orphan) {
                Ok(result) => debug!(%orphan_hash, ?result, "órfão adotado"),
                Err(err) => warn!(%orphan_hash, %err, "órfão rejeitado"),
            }
        }

        Ok(acceptance)
    }

    /// Reorganização administrativa forçada para um ramo lateral
    ///
    /// `from` tem de ser o tip corrente e `to` uma folha lateral já
    /// descarregada; a precondição de mais trabalho é ignorada.
    ///
    /// # Errors
    ///
    /// Precondições violadas devolvem erro de formato; falhas de
    /// validação do ramo devolvem o erro respetivo com o tip original
    /// restaurado.
    pub fn force_reorg(&mut self, from: Hash256, to: Hash256) -> Result<(), ValidationError> {
        if from != self.tip_hash() {
            return Err(crate::error::DecodeError::InvalidValue(format!(
                "from {from} is not the current tip"
            ))
            .into());
        }
        let Some(target) = self.index.get(&to) else {
            return Err(crate::error::DecodeError::InvalidValue(format!(
                "unknown target {to}"
            ))
            .into());
        };
        let target_node = self.index.node(target);
        if target_node.in_main_chain {
            return Err(crate::error::DecodeError::InvalidValue(
                "target is already on the main chain".into(),
            )
            .into());
        }
        if target_node.status.is_permanently_invalid() {
            return Err(ValidationError::InvalidAncestor);
        }
        if !target_node.children.is_empty() {
            return Err(crate::error::DecodeError::InvalidValue(
                "target is not a side-chain leaf".into(),
            )
            .into());
        }

        info!(%from, %to, "reorganização forçada");
        self.reorganize(target).map(|_| ())
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    // Decide se o candidato passa a tip: mais trabalho acumulado, com
    // desempate pela ordem de chegada (o tip corrente ganha empates).
    fn evaluate_candidate(&mut self, node: NodeId) -> Result<BlockAcceptance, ValidationError> {
        let candidate_work = self.index.node(node).cum_work;
        let tip_work = self.index.node(self.tip).cum_work;

        if candidate_work <= tip_work {
            debug!(hash = %self.index.node(node).hash, "aceite em ramo lateral");
            return Ok(BlockAcceptance::SideChain);
        }

        if self.index.node(node).parent == Some(self.tip) {
            self.extend_tip(node)?;
            return Ok(BlockAcceptance::Extended);
        }

        self.reorganize(node)
    }

    // Liga um bloco que estende diretamente o tip
    fn extend_tip(&mut self, node: NodeId) -> Result<(), ValidationError> {
        let hash = self.index.node(node).hash;
        let block = self.blocks.get(&hash).cloned().ok_or_else(|| {
            StoreError::Corrupt {
                bucket: BUCKET_BLOCKS.into(),
                reason: format!("missing block body {hash}"),
            }
        })?;

        let block_cancel = CancelToken::new();
        match connect_block(
            &block,
            &mut self.utxo,
            &mut self.stake,
            &self.subsidy,
            &self.params,
            &block_cancel,
        ) {
            Ok(journal) => {
                self.journals.insert(hash, journal);
                let node_ref = self.index.node_mut(node);
                node_ref.status = NodeStatus::FullyValidated;
                node_ref.in_main_chain = true;
                self.tip = node;
                self.commit_tip_change(&[node], &[])?;

                let height = self.index.node(node).height();
                info!(%hash, height, "cadeia principal estendida");
                self.notify(&ChainNotification::BlockConnected { hash, height });
                self.notify(&ChainNotification::TipChanged { hash, height });
                Ok(())
            }
            Err(err) => {
                if err.severity() == Severity::InvalidBlock {
                    self.index.node_mut(node).status = NodeStatus::InvalidBlock;
                } else if err.severity() == Severity::InvalidHeader {
                    self.index.mark_invalid(node);
                }
                self.persist_node_status(node)?;
                warn!(%hash, %err, "bloco rejeitado na fase 3");
                Err(err)
            }
        }
    }

    // Reorganização completa: desliga até ao ponto de bifurcação, liga o
    // ramo novo, e em falha repõe o ramo original.
    #[allow(clippy::too_many_lines)]
    fn reorganize(&mut self, new_tip: NodeId) -> Result<BlockAcceptance, ValidationError> {
        let old_tip = self.tip;
        let old_tip_hash = self.index.node(old_tip).hash;
        let fork = self
            .index
            .lowest_common_ancestor(old_tip, new_tip)
            .ok_or(ValidationError::InvalidAncestor)?;

        // ramo novo precisa dos blocos completos
        let attach_path = self.index.path_between(fork, new_tip);
        for id in &attach_path {
            let hash = self.index.node(*id).hash;
            if self.index.node(*id).status.is_permanently_invalid() {
                return Err(ValidationError::InvalidAncestor);
            }
            if !self.blocks.contains_key(&hash) {
                return Err(StoreError::Corrupt {
                    bucket: BUCKET_BLOCKS.into(),
                    reason: format!("side chain block {hash} not downloaded"),
                }
                .into());
            }
        }

        // desliga o ramo corrente, do tip até à bifurcação
        let detach_path = self.index.path_between(fork, old_tip);
        for id in detach_path.iter().rev() {
            self.detach_block(*id)?;
        }

        // liga o ramo novo; qualquer falha aborta e repõe o original
        let mut attached: Vec<NodeId> = Vec::with_capacity(attach_path.len());
        for id in &attach_path {
            match self.attach_block(*id) {
                Ok(()) => attached.push(*id),
                Err(err) => {
                    warn!(
                        hash = %self.index.node(*id).hash,
                        %err,
                        "falha ao ligar ramo novo; a repor o original"
                    );
                    if err.severity() == Severity::InvalidBlock {
                        self.index.node_mut(*id).status = NodeStatus::InvalidBlock;
                    } else if err.severity() == Severity::InvalidHeader {
                        self.index.mark_invalid(*id);
                    }

                    for undo_id in attached.iter().rev() {
                        self.detach_block(*undo_id)?;
                    }
                    for redo_id in &detach_path {
                        self.attach_block(*redo_id)?;
                    }
                    self.tip = old_tip;
                    self.persist_node_status(*id)?;
                    return Err(err);
                }
            }
        }

        self.tip = new_tip;
        self.commit_tip_change(&attach_path, &detach_path)?;

        let new_tip_hash = self.index.node(new_tip).hash;
        let height = self.index.node(new_tip).height();
        info!(
            %old_tip_hash,
            %new_tip_hash,
            detached = detach_path.len(),
            attached = attach_path.len(),
            "reorganização concluída"
        );
        self.notify(&ChainNotification::Reorganized {
            old_tip: old_tip_hash,
            new_tip: new_tip_hash,
        });
        self.notify(&ChainNotification::TipChanged {
            hash: new_tip_hash,
            height,
        });

        Ok(BlockAcceptance::Reorganized {
            detached: detach_path.len() as u32,
            attached: attach_path.len() as u32,
        })
    }

    // Desliga o bloco do topo da cadeia principal, repondo o estado
    fn detach_block(&mut self, node: NodeId) -> Result<(), ValidationError> {
        let hash = self.index.node(node).hash;
        let journal = self.journals.remove(&hash).ok_or_else(|| {
            StoreError::Corrupt {
                bucket: BUCKET_BLOCK_INDEX.into(),
                reason: format!("missing journal for connected block {hash}"),
            }
        })?;

        self.utxo.disconnect_block(&journal.utxo);
        self.stake.disconnect_block(&journal.stake);
        self.index.node_mut(node).in_main_chain = false;

        let height = self.index.node(node).height();
        debug!(%hash, height, "bloco desligado");
        self.notify(&ChainNotification::BlockDisconnected { hash, height });
        Ok(())
    }

    // Liga um bloco validando a fase 3 contra o estado já deslocado
    fn attach_block(&mut self, node: NodeId) -> Result<(), ValidationError> {
        let hash = self.index.node(node).hash;
        let block = self.blocks.get(&hash).cloned().ok_or_else(|| {
            StoreError::Corrupt {
                bucket: BUCKET_BLOCKS.into(),
                reason: format!("missing block body {hash}"),
            }
        })?;

        let block_cancel = CancelToken::new();
        let journal = connect_block(
            &block,
            &mut self.utxo,
            &mut self.stake,
            &self.subsidy,
            &self.params,
            &block_cancel,
        )?;
        self.journals.insert(hash, journal);

        let node_ref = self.index.node_mut(node);
        node_ref.status = NodeStatus::FullyValidated;
        node_ref.in_main_chain = true;

        let height = self.index.node(node).height();
        debug!(%hash, height, "bloco ligado");
        self.notify(&ChainNotification::BlockConnected { hash, height });
        Ok(())
    }

    // Publica o novo tip: commit atómico do estado e novo snapshot
    fn commit_tip_change(
        &mut self,
        attached: &[NodeId],
        detached: &[NodeId],
    ) -> Result<(), ValidationError> {
        let mut txn = self.kv.begin_write();
        self.utxo.commit(txn.as_mut())?;
        self.stake.commit(txn.as_mut())?;

        for id in detached {
            let node = self.index.node(*id);
            txn.delete(BUCKET_BEST_CHAIN, &node.height().to_be_bytes())?;
        }
        for id in attached {
            let node = self.index.node(*id);
            txn.put(
                BUCKET_BEST_CHAIN,
                &node.height().to_be_bytes(),
                node.hash.as_bytes(),
            )?;
        }
        for id in attached.iter().chain(detached) {
            let node = self.index.node(*id);
            txn.put(
                BUCKET_BLOCK_INDEX,
                &node_index_key(node.height(), &node.hash),
                &node_index_value(node),
            )?;
        }
        txn.put(BUCKET_META, KEY_TIP, self.tip_hash().as_bytes())?;
        txn.commit()?;

        self.publish_snapshot();
        Ok(())
    }

    fn publish_snapshot(&mut self) {
        let tip = self.index.node(self.tip);
        let snapshot = Arc::new(ChainSnapshot {
            tip_hash: tip.hash,
            height: tip.height(),
            bits: tip.header.bits,
            sbits: tip.header.sbits,
            cum_work: tip.cum_work,
            utxo: self.utxo.snapshot(),
            stake: self.stake.snapshot(),
        });
        *self.snapshot.write().expect("lock de snapshot") = snapshot;
    }

    fn persist_block(&self, block: &Block, node: NodeId) -> Result<(), StoreError> {
        let mut txn = self.kv.begin_write();
        txn.put(BUCKET_BLOCKS, block.hash().as_bytes(), &block.encode())?;
        let node_ref = self.index.node(node);
        txn.put(
            BUCKET_BLOCK_INDEX,
            &node_index_key(node_ref.height(), &node_ref.hash),
            &node_index_value(node_ref),
        )?;
        txn.commit()
    }

    fn persist_node_status(&self, node: NodeId) -> Result<(), StoreError> {
        let node_ref = self.index.node(node);
        let mut txn = self.kv.begin_write();
        txn.put(
            BUCKET_BLOCK_INDEX,
            &node_index_key(node_ref.height(), &node_ref.hash),
            &node_index_value(node_ref),
        )?;
        txn.commit()
    }

    /// Arranca o worker de escrita único e devolve o handle de submissão
    #[must_use]
    pub fn start(self) -> (ChainHandle, std::thread::JoinHandle<()>) {
        let (sender, receiver) = sync_channel::<Command>(SUBMISSION_QUEUE_DEPTH);
        let snapshot = Arc::clone(&self.snapshot);
        let cancel = self.cancel.clone();

        let worker = std::thread::spawn(move || {
            let mut manager = self;
            while let Ok(command) = receiver.recv() {
                match command {
                    Command::ProcessBlock(block, reply) => {
                        let result = manager.process_block(*block);
                        let _ = reply.send(result);
                    }
                    Command::ForceReorg { from, to, reply } => {
                        let _ = reply.send(manager.force_reorg(from, to));
                    }
                    Command::Shutdown => break,
                }
            }
        });

        (
            ChainHandle {
                sender,
                snapshot,
                cancel,
            },
            worker,
        )
    }
}

// Comandos da fila do worker
enum Command {
    ProcessBlock(
        Box<Block>,
        Sender<Result<BlockAcceptance, ValidationError>>,
    ),
    ForceReorg {
        from: Hash256,
        to: Hash256,
        reply: Sender<Result<(), ValidationError>>,
    },
    Shutdown,
}

/// Handle clonável para submeter trabalho ao worker da cadeia
#[derive(Clone)]
pub struct ChainHandle {
    sender: SyncSender<Command>,
    snapshot: Arc<RwLock<Arc<ChainSnapshot>>>,
    cancel: CancelToken,
}

impl ChainHandle {
    /// Submete um bloco e espera pelo resultado
    ///
    /// # Errors
    ///
    /// Devolve o erro de validação, ou `Cancelled` se o worker terminou
    pub fn submit_block(&self, block: Block) -> Result<BlockAcceptance, ValidationError> {
        let (reply, response) = std::sync::mpsc::channel();
        self.sender
            .send(Command::ProcessBlock(Box::new(block), reply))
            .map_err(|_| ValidationError::Cancelled)?;
        response.recv().map_err(|_| ValidationError::Cancelled)?
    }

    /// Pede uma reorganização forçada
    ///
    /// # Errors
    ///
    /// Como `ChainManager::force_reorg`
    pub fn force_reorg(&self, from: Hash256, to: Hash256) -> Result<(), ValidationError> {
        let (reply, response) = std::sync::mpsc::channel();
        self.sender
            .send(Command::ForceReorg { from, to, reply })
            .map_err(|_| ValidationError::Cancelled)?;
        response.recv().map_err(|_| ValidationError::Cancelled)?
    }

    /// Snapshot corrente sem passar pelo worker
    #[must_use]
    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        Arc::clone(&self.snapshot.read().expect("lock de snapshot"))
    }

    /// Cancela validações em curso e futuras
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Termina o worker depois de drenar a fila
    pub fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

// Chave do bucket blockidx: altura big-endian e hash
fn node_index_key(height: u32, hash: &Hash256) -> Vec<u8> {
    let mut key = height.to_be_bytes().to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

// Valor persistido de um nó: estado, pertença à cadeia e trabalho
fn node_index_value(node: &crate::index::ChainNode) -> Vec<u8> {
    let status = match node.status {
        NodeStatus::HeaderKnown => 0u8,
        NodeStatus::Downloaded => 1,
        NodeStatus::FullyValidated => 2,
        NodeStatus::InvalidBlock => 3,
        NodeStatus::Invalid => 4,
        NodeStatus::InvalidAncestor => 5,
    };
    let mut out = Vec::with_capacity(34);
    out.push(status);
    out.push(u8::from(node.in_main_chain));
    let mut work = [0u8; 32];
    node.cum_work.to_big_endian(&mut work);
    out.extend_from_slice(&work);
    out
}
