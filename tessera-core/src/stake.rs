//! Máquina de estados do pool de tickets
//!
//! Tickets nascem imaturos, amadurecem para o conjunto vivo, são sorteados
//! pela loteria determinística por bloco e terminam consumidos por voto,
//! perdidos (e depois revogados) ou expirados. O conjunto vivo é ordenado
//! pelo hash do ticket para que o sorteio seja determinístico.

use serde::{Deserialize, Serialize};
use shared::{Amount, Blake256, Hash256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{StoreError, ValidationError};
use crate::params::ChainParams;
use crate::script;
use crate::script::opcodes::{OP_SSGEN, OP_SSRTX, OP_SSTX, OP_SSTXCHANGE};
use crate::store::{
    WriteTxn, BUCKET_STAKE_IMMATURE, BUCKET_STAKE_LIVE, BUCKET_STAKE_MISSED, BUCKET_STAKE_REVOKED,
};
use crate::transaction::{OutPoint, Transaction, TxInput, TxOutput, TxTree};
use crate::wire::{self, Cursor};

/// Dados de um ticket no pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInfo {
    /// Altura do bloco em que o ticket foi comprado
    pub purchase_height: u32,
}

/// Ticket no conjunto de perdidos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedTicket {
    pub info: TicketInfo,
    /// Perdido por expiração em vez de sorteio não respondido
    pub expired: bool,
}

/// Classificação estrutural de uma transação da árvore de stake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StakeTx {
    /// Compra de ticket (SStx)
    Ticket,
    /// Voto (SSGen) consumindo um ticket sorteado
    Vote {
        ticket: Hash256,
        block_hash: Hash256,
        block_height: u32,
        vote_bits: u16,
    },
    /// Revogação (SSRtx) de um ticket perdido
    Revocation { ticket: Hash256 },
}

/// Classifica uma transação de stake pela sua estrutura
///
/// Devolve `None` quando a transação não tem nenhuma das três formas.
#[must_use]
pub fn classify(tx: &Transaction) -> Option<StakeTx> {
    // Voto: stakebase nulo + gasto do ticket, referência ao bloco votado e
    // vote bits em null-data, pagamentos marcados com OP_SSGEN
    if tx.inputs.len() == 2
        && tx.inputs[0].is_null_input()
        && !tx.inputs[1].is_null_input()
        && tx.outputs.len() >= 3
    {
        let reference = script::null_data_payload(&tx.outputs[0].pk_script)?;
        let bits_payload = script::null_data_payload(&tx.outputs[1].pk_script)?;
        if reference.len() == 36 && bits_payload.len() == 2 {
            let payouts_tagged = tx.outputs[2..]
                .iter()
                .all(|o| script::stake_tag(&o.pk_script) == Some(OP_SSGEN));
            if payouts_tagged {
                let block_hash =
                    Hash256::from_bytes(reference[..32].try_into().expect("32 bytes"));
                let block_height =
                    u32::from_le_bytes(reference[32..36].try_into().expect("4 bytes"));
                let vote_bits =
                    u16::from_le_bytes(bits_payload.try_into().expect("2 bytes"));
                return Some(StakeTx::Vote {
                    ticket: tx.inputs[1].previous_output.txid,
                    block_hash,
                    block_height,
                    vote_bits,
                });
            }
        }
        return None;
    }

    // Revogação: gasto único do ticket com pagamentos OP_SSRTX
    if tx.inputs.len() == 1
        && !tx.inputs[0].is_null_input()
        && tx.inputs[0].previous_output.tree == TxTree::Stake
        && !tx.outputs.is_empty()
        && tx.outputs
            .iter()
            .all(|o| script::stake_tag(&o.pk_script) == Some(OP_SSRTX))
    {
        return Some(StakeTx::Revocation {
            ticket: tx.inputs[0].previous_output.txid,
        });
    }

    // Compra: primeiro output marcado OP_SSTX, restantes troco marcado
    if !tx.outputs.is_empty()
        && script::stake_tag(&tx.outputs[0].pk_script) == Some(OP_SSTX)
        && tx.outputs[1..]
            .iter()
            .all(|o| script::stake_tag(&o.pk_script) == Some(OP_SSTXCHANGE))
    {
        return Some(StakeTx::Ticket);
    }

    None
}

/// Constrói uma transação de compra de ticket
#[must_use]
pub fn ticket_purchase(
    funding: OutPoint,
    funding_value: Amount,
    price: Amount,
    voting_script: &[u8],
    change_script: &[u8],
) -> Transaction {
    let mut outputs = vec![TxOutput::new(price, script::stake_tagged(OP_SSTX, voting_script))];
    let change = funding_value - price;
    if change > 0 {
        outputs.push(TxOutput::new(
            change,
            script::stake_tagged(OP_SSTXCHANGE, change_script),
        ));
    }
    Transaction::new(1, vec![TxInput::new(funding, funding_value, Vec::new())], outputs)
}

/// Constrói um voto para o ticket sorteado, votando no bloco dado
#[must_use]
pub fn vote_transaction(
    ticket: &Transaction,
    voted_block: Hash256,
    voted_height: u32,
    vote_bits: u16,
    vote_subsidy: Amount,
    payout_script: &[u8],
) -> Transaction {
    let ticket_value = ticket.outputs[0].value;

    let mut reference = Vec::with_capacity(36);
    reference.extend_from_slice(voted_block.as_bytes());
    reference.extend_from_slice(&voted_height.to_le_bytes());

    let stakebase = TxInput::coinbase(vote_subsidy, Vec::new());
    let ticket_in = TxInput::new(
        OutPoint::new(ticket.hash(), 0, TxTree::Stake),
        ticket_value,
        Vec::new(),
    );

    Transaction::new(
        1,
        vec![stakebase, ticket_in],
        vec![
            TxOutput::new(0, script::null_data_script(&reference)),
            TxOutput::new(0, script::null_data_script(&vote_bits.to_le_bytes())),
            TxOutput::new(
                ticket_value + vote_subsidy,
                script::stake_tagged(OP_SSGEN, payout_script),
            ),
        ],
    )
}

/// Constrói a revogação de um ticket perdido
#[must_use]
pub fn revocation_transaction(ticket: &Transaction, payout_script: &[u8]) -> Transaction {
    let ticket_value = ticket.outputs[0].value;
    Transaction::new(
        1,
        vec![TxInput::new(
            OutPoint::new(ticket.hash(), 0, TxTree::Stake),
            ticket_value,
            Vec::new(),
        )],
        vec![TxOutput::new(
            ticket_value,
            script::stake_tagged(OP_SSRTX, payout_script),
        )],
    )
}

/// PRNG determinística da loteria, encadeada sobre BLAKE-256
#[derive(Debug, Clone)]
pub struct TicketPrng {
    seed: Hash256,
    last: Hash256,
    word_idx: usize,
    hash_idx: u64,
}

impl TicketPrng {
    /// Semeia a PRNG com bytes arbitrários (o hash do bloco anterior)
    #[must_use]
    pub fn new(seed: &[u8]) -> Self {
        let seed_hash = Hash256::blake256(seed);
        Self {
            seed: seed_hash,
            last: seed_hash,
            word_idx: 0,
            hash_idx: 0,
        }
    }

    /// Próxima palavra de 32 bits
    pub fn next_u32(&mut self) -> u32 {
        let bytes = self.last.as_bytes();
        let word = u32::from_be_bytes(
            bytes[self.word_idx * 4..self.word_idx * 4 + 4]
                .try_into()
                .expect("4 bytes"),
        );
        self.word_idx += 1;
        if self.word_idx == 8 {
            self.hash_idx += 1;
            let mut hasher = Blake256::new();
            hasher.update(self.seed.as_bytes());
            hasher.update(&self.hash_idx.to_be_bytes());
            self.last = hasher.finalize();
            self.word_idx = 0;
        }
        word
    }

    /// Valor uniforme em `[0, upper)` por amostragem com rejeição
    pub fn uniform(&mut self, upper: u32) -> u32 {
        if upper < 2 {
            return 0;
        }
        let min = upper.wrapping_neg() % upper;
        loop {
            let value = self.next_u32();
            if value >= min {
                return value % upper;
            }
        }
    }
}

/// Estado completo do pool de tickets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StakeState {
    /// Tickets vivos, ordenados por hash
    live: BTreeMap<Hash256, TicketInfo>,
    /// Tickets imaturos por altura de maturação
    immature: BTreeMap<u32, Vec<(Hash256, TicketInfo)>>,
    /// Tickets sorteados sem voto, ou expirados, à espera de revogação
    missed: BTreeMap<Hash256, MissedTicket>,
    /// Tickets revogados
    revoked: BTreeMap<Hash256, TicketInfo>,
}

impl StakeState {
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_live(&self, ticket: &Hash256) -> bool {
        self.live.contains_key(ticket)
    }

    #[must_use]
    pub fn is_missed(&self, ticket: &Hash256) -> bool {
        self.missed.contains_key(ticket)
    }

    #[must_use]
    pub fn is_revoked(&self, ticket: &Hash256) -> bool {
        self.revoked.contains_key(ticket)
    }

    #[must_use]
    pub fn immature_count(&self) -> usize {
        self.immature.values().map(Vec::len).sum()
    }
}

/// Vista imutável do estado de stake
pub type StakeView = Arc<StakeState>;

/// Journal de um bloco conectado, suficiente para a inversão exata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StakeJournal {
    /// Altura do bloco conectado
    pub height: u32,
    /// Vencedores sorteados para este bloco, na ordem do sorteio
    pub winners: Vec<Hash256>,
    /// Tickets consumidos por voto
    pub voted: Vec<(Hash256, TicketInfo)>,
    /// Vencedores sem voto, movidos para perdidos
    pub missed: Vec<(Hash256, TicketInfo)>,
    /// Tickets revogados neste bloco
    pub revoked: Vec<(Hash256, MissedTicket)>,
    /// Tickets amadurecidos neste bloco
    pub matured: Vec<(Hash256, TicketInfo)>,
    /// Tickets comprados neste bloco (altura de maturação, entrada)
    pub purchased: Vec<(u32, Hash256, TicketInfo)>,
    /// Tickets expirados neste bloco
    pub expired: Vec<(Hash256, TicketInfo)>,
}

// Alteração pendente de persistência
#[derive(Debug, Clone)]
struct DirtyOp {
    bucket: &'static str,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

/// Loja do estado de stake com journaling e persistência
#[derive(Debug, Default)]
pub struct StakeStore {
    state: Arc<StakeState>,
    dirty: Vec<DirtyOp>,
}

impl StakeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Estado corrente (leitura)
    #[must_use]
    pub fn state(&self) -> &StakeState {
        &self.state
    }

    /// Vista imutável e barata do estado corrente
    #[must_use]
    pub fn snapshot(&self) -> StakeView {
        Arc::clone(&self.state)
    }

    /// Vencedores da loteria para o bloco filho de `prev_hash`
    ///
    /// Sorteio determinístico sobre o conjunto vivo ordenado, semeado pelo
    /// hash do bloco anterior.
    #[must_use]
    pub fn winning_tickets(&self, prev_hash: &Hash256, params: &ChainParams) -> Vec<Hash256> {
        let live: Vec<&Hash256> = self.state.live.keys().collect();
        if live.is_empty() {
            return Vec::new();
        }

        let count = usize::from(params.tickets_per_block).min(live.len());
        let mut prng = TicketPrng::new(prev_hash.as_bytes());
        let mut picked = Vec::with_capacity(count);
        while picked.len() < count {
            let idx = prng.uniform(live.len() as u32) as usize;
            if !picked.contains(&idx) {
                picked.push(idx);
            }
        }
        picked.into_iter().map(|idx| *live[idx]).collect()
    }

    /// Estado final do cabeçalho: últimos 6 bytes do BLAKE-256 dos
    /// vencedores ordenados
    #[must_use]
    pub fn final_state(winners: &[Hash256]) -> [u8; 6] {
        if winners.is_empty() {
            return [0u8; 6];
        }
        let mut sorted = winners.to_vec();
        sorted.sort_unstable();
        let mut hasher = Blake256::new();
        for winner in &sorted {
            hasher.update(winner.as_bytes());
        }
        let digest = hasher.finalize();
        digest.as_bytes()[26..32].try_into().expect("6 bytes")
    }

    /// Conecta um bloco: sorteio, consumo de votos, perdas, revogações,
    /// maturações e expirações, por esta ordem
    ///
    /// # Errors
    ///
    /// Falhas de ciclo de vida (voto sem sorteio, revogação de ticket não
    /// perdido, compra duplicada) devolvem o erro de stake respetivo.
    pub fn connect_block(
        &mut self,
        height: u32,
        prev_hash: &Hash256,
        stake_txs: &[Transaction],
        params: &ChainParams,
    ) -> Result<StakeJournal, ValidationError> {
        let mut journal = StakeJournal {
            height,
            ..StakeJournal::default()
        };

        // 1. sorteio (apenas com votação ativa)
        if height >= params.subsidy.stake_validation_height {
            journal.winners = self.winning_tickets(prev_hash, params);
        }

        // Trabalha numa cópia: um erro a meio descarta tudo, nunca fica
        // meio estado aplicado.
        let mut working = (*self.state).clone();
        let state = &mut working;

        // 2. votos consomem tickets sorteados
        let mut voted_set: Vec<Hash256> = Vec::new();
        for tx in stake_txs {
            match classify(tx) {
                Some(StakeTx::Vote { ticket, .. }) => {
                    if !journal.winners.contains(&ticket) {
                        return Err(ValidationError::WinnerMismatch);
                    }
                    let info = state.live.remove(&ticket).ok_or_else(|| {
                        ValidationError::BadTicketLifecycle(format!(
                            "voted ticket {ticket} is not live"
                        ))
                    })?;
                    voted_set.push(ticket);
                    journal.voted.push((ticket, info));
                }
                Some(_) => {}
                None => {
                    return Err(ValidationError::BadTicketLifecycle(
                        "unrecognized stake transaction".into(),
                    ))
                }
            }
        }

        // 3. vencedores sem voto ficam perdidos
        for winner in journal.winners.clone() {
            if voted_set.contains(&winner) {
                continue;
            }
            let info = state.live.remove(&winner).ok_or_else(|| {
                ValidationError::BadTicketLifecycle(format!("winner {winner} is not live"))
            })?;
            state
                .missed
                .insert(winner, MissedTicket { info, expired: false });
            journal.missed.push((winner, info));
        }

        // 4. revogações libertam tickets perdidos
        for tx in stake_txs {
            if let Some(StakeTx::Revocation { ticket }) = classify(tx) {
                let missed = state.missed.remove(&ticket).ok_or_else(|| {
                    ValidationError::BadTicketLifecycle(format!(
                        "revocation of ticket {ticket} that is not missed"
                    ))
                })?;
                state.revoked.insert(ticket, missed.info);
                journal.revoked.push((ticket, missed));
            }
        }

        // 5. maturações desta altura
        if let Some(matured) = state.immature.remove(&height) {
            for (hash, info) in matured {
                state.live.insert(hash, info);
                journal.matured.push((hash, info));
            }
        }

        // 6. expirações
        if height > params.ticket_expiry {
            let expiry_cutoff = height - params.ticket_expiry;
            let expired: Vec<Hash256> = state
                .live
                .iter()
                .filter(|(_, info)| info.purchase_height <= expiry_cutoff)
                .map(|(hash, _)| *hash)
                .collect();
            for hash in expired {
                let info = state
                    .live
                    .remove(&hash)
                    .expect("selecionado do conjunto vivo");
                state
                    .missed
                    .insert(hash, MissedTicket { info, expired: true });
                journal.expired.push((hash, info));
            }
        }

        // 7. compras entram imaturas
        for tx in stake_txs {
            if classify(tx) == Some(StakeTx::Ticket) {
                let hash = tx.hash();
                let info = TicketInfo {
                    purchase_height: height,
                };
                let mature_at = height + params.ticket_maturity;
                let bucket = state.immature.entry(mature_at).or_default();
                if bucket.iter().any(|(h, _)| *h == hash) {
                    return Err(ValidationError::BadTicketLifecycle(format!(
                        "duplicate ticket purchase {hash}"
                    )));
                }
                bucket.push((hash, info));
                journal.purchased.push((mature_at, hash, info));
            }
        }

        self.state = Arc::new(working);
        self.record_journal(&journal, false);
        Ok(journal)
    }

    /// Desconecta um bloco, invertendo exatamente o journal da conexão
    pub fn disconnect_block(&mut self, journal: &StakeJournal) {
        let state = Arc::make_mut(&mut self.state);

        for (mature_at, hash, _) in journal.purchased.iter().rev() {
            if let Some(bucket) = state.immature.get_mut(mature_at) {
                bucket.retain(|(h, _)| h != hash);
                if bucket.is_empty() {
                    state.immature.remove(mature_at);
                }
            }
        }
        for (hash, info) in journal.expired.iter().rev() {
            state.missed.remove(hash);
            state.live.insert(*hash, *info);
        }
        // maturações voltam ao bucket imaturo da altura desconectada
        for (hash, info) in journal.matured.iter().rev() {
            state.live.remove(hash);
            state
                .immature
                .entry(journal.height)
                .or_default()
                .push((*hash, *info));
        }
        for (hash, missed) in journal.revoked.iter().rev() {
            state.revoked.remove(hash);
            state.missed.insert(*hash, *missed);
        }
        for (hash, info) in journal.missed.iter().rev() {
            state.missed.remove(hash);
            state.live.insert(*hash, *info);
        }
        for (hash, info) in journal.voted.iter().rev() {
            state.live.insert(*hash, *info);
        }

        self.record_journal(journal, true);
    }

    /// Persiste o estado de stake alterado desde o último commit
    ///
    /// # Errors
    ///
    /// Propaga falhas do backend; as alterações pendentes permanecem
    pub fn commit(&mut self, txn: &mut dyn WriteTxn) -> Result<(), StoreError> {
        for op in &self.dirty {
            match &op.value {
                Some(value) => txn.put(op.bucket, &op.key, value)?,
                None => txn.delete(op.bucket, &op.key)?,
            }
        }
        self.dirty.clear();
        Ok(())
    }

    // Converte os movimentos de um journal em operações de persistência;
    // `reverse` inverte o sentido (desconexão).
    fn record_journal(&mut self, journal: &StakeJournal, reverse: bool) {
        let mut ops: Vec<DirtyOp> = Vec::new();
        let live_key = |hash: &Hash256| hash.as_bytes().to_vec();
        let immature_key = |mature_at: u32, hash: &Hash256| {
            let mut key = mature_at.to_be_bytes().to_vec();
            key.extend_from_slice(hash.as_bytes());
            key
        };

        for (hash, info) in &journal.voted {
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_LIVE,
                key: live_key(hash),
                value: reverse.then(|| encode_info(info)),
            });
        }
        for (hash, info) in &journal.missed {
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_LIVE,
                key: live_key(hash),
                value: reverse.then(|| encode_info(info)),
            });
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_MISSED,
                key: live_key(hash),
                value: (!reverse).then(|| {
                    encode_missed(&MissedTicket {
                        info: *info,
                        expired: false,
                    })
                }),
            });
        }
        for (hash, info) in &journal.expired {
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_LIVE,
                key: live_key(hash),
                value: reverse.then(|| encode_info(info)),
            });
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_MISSED,
                key: live_key(hash),
                value: (!reverse).then(|| {
                    encode_missed(&MissedTicket {
                        info: *info,
                        expired: true,
                    })
                }),
            });
        }
        for (hash, missed) in &journal.revoked {
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_MISSED,
                key: live_key(hash),
                value: reverse.then(|| encode_missed(missed)),
            });
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_REVOKED,
                key: live_key(hash),
                value: (!reverse).then(|| encode_info(&missed.info)),
            });
        }
        for (hash, info) in &journal.matured {
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_IMMATURE,
                key: immature_key(journal.height, hash),
                value: reverse.then(|| encode_info(info)),
            });
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_LIVE,
                key: live_key(hash),
                value: (!reverse).then(|| encode_info(info)),
            });
        }
        for (mature_at, hash, info) in &journal.purchased {
            ops.push(DirtyOp {
                bucket: BUCKET_STAKE_IMMATURE,
                key: immature_key(*mature_at, hash),
                value: (!reverse).then(|| encode_info(info)),
            });
        }

        self.dirty.extend(ops);
    }
}

fn encode_info(info: &TicketInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    wire::write_u32(&mut out, info.purchase_height);
    out
}

fn encode_missed(missed: &MissedTicket) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    wire::write_u32(&mut out, missed.info.purchase_height);
    out.push(u8::from(missed.expired));
    out
}

/// Decodifica um `TicketInfo` persistido
///
/// # Errors
///
/// Retorna erro com bytes malformados
pub fn decode_info(data: &[u8]) -> Result<TicketInfo, crate::error::DecodeError> {
    let mut cur = Cursor::new(data);
    Ok(TicketInfo {
        purchase_height: cur.read_u32()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvBackend, MemoryKv};

    fn simnet() -> &'static ChainParams {
        ChainParams::simnet()
    }

    fn new_ticket(tag: u8) -> Transaction {
        // cada chamada gera um hash de ticket distinto via outpoint
        let funding = OutPoint::new(Hash256::blake256(&[tag]), 0, TxTree::Regular);
        ticket_purchase(funding, 100_000, 20_000, &[0x51], &[0x51])
    }

    // Compra `count` tickets na altura dada e avança até todos estarem
    // vivos; devolve (store, transações de compra).
    fn store_with_live_tickets(count: u8) -> (StakeStore, Vec<Transaction>) {
        let params = simnet();
        let mut store = StakeStore::new();
        let tickets: Vec<Transaction> = (0..count).map(new_ticket).collect();

        store
            .connect_block(1, &Hash256::blake256(b"b0"), &tickets, params)
            .unwrap();
        for height in 2..=(1 + params.ticket_maturity) {
            store
                .connect_block(height, &Hash256::blake256(&height.to_le_bytes()), &[], params)
                .unwrap();
        }
        assert_eq!(store.state().live_count(), usize::from(count));
        (store, tickets)
    }

    #[test]
    fn test_classification_of_builders() {
        let ticket = new_ticket(1);
        assert_eq!(classify(&ticket), Some(StakeTx::Ticket));

        let voted_block = Hash256::blake256(b"bloco votado");
        let vote = vote_transaction(&ticket, voted_block, 7, 0x0001, 5_000, &[0x51]);
        assert_eq!(
            classify(&vote),
            Some(StakeTx::Vote {
                ticket: ticket.hash(),
                block_hash: voted_block,
                block_height: 7,
                vote_bits: 0x0001,
            })
        );

        let revocation = revocation_transaction(&ticket, &[0x51]);
        assert_eq!(
            classify(&revocation),
            Some(StakeTx::Revocation {
                ticket: ticket.hash()
            })
        );

        let plain = Transaction::coinbase(1, 100, vec![0x51]);
        assert_eq!(classify(&plain), None);
    }

    #[test]
    fn test_prng_is_deterministic() {
        let mut a = TicketPrng::new(b"semente");
        let mut b = TicketPrng::new(b"semente");
        for _ in 0..40 {
            assert_eq!(a.next_u32(), b.next_u32());
        }

        // sementes diferentes divergem
        let mut c = TicketPrng::new(b"outra semente");
        let mut d = TicketPrng::new(b"semente");
        assert!((0..8).any(|_| c.next_u32() != d.next_u32()));

        // uniform respeita o limite
        let mut prng = TicketPrng::new(b"semente");
        for upper in [1u32, 2, 5, 64] {
            for _ in 0..32 {
                assert!(prng.uniform(upper) < upper.max(1));
            }
        }
    }

    #[test]
    fn test_tickets_mature_into_live_pool() {
        let params = simnet();
        let (store, _) = store_with_live_tickets(6);
        assert_eq!(store.state().immature_count(), 0);
        assert_eq!(store.state().live_count(), 6);
        assert!(params.ticket_maturity > 0);
    }

    #[test]
    fn test_lottery_is_deterministic_and_sized() {
        let params = simnet();
        let (store, _) = store_with_live_tickets(8);

        let prev = Hash256::blake256(b"tip");
        let winners_a = store.winning_tickets(&prev, params);
        let winners_b = store.winning_tickets(&prev, params);
        assert_eq!(winners_a, winners_b);
        assert_eq!(winners_a.len(), usize::from(params.tickets_per_block));

        // semente diferente, sorteio diferente (com 8 tickets e 5 vagas a
        // colisão completa é improvável; mantém o teste determinístico)
        let winners_c = store.winning_tickets(&Hash256::blake256(b"outro tip"), params);
        assert_eq!(winners_c.len(), usize::from(params.tickets_per_block));
    }

    #[test]
    fn test_final_state_is_order_insensitive() {
        let a = Hash256::blake256(b"a");
        let b = Hash256::blake256(b"b");
        assert_eq!(
            StakeStore::final_state(&[a, b]),
            StakeStore::final_state(&[b, a])
        );
        assert_eq!(StakeStore::final_state(&[]), [0u8; 6]);
    }

    #[test]
    fn test_connect_votes_and_misses() {
        let params = simnet();
        let (mut store, tickets) = store_with_live_tickets(8);
        let height = params.subsidy.stake_validation_height;
        let prev = Hash256::blake256(b"tip");

        let winners = store.winning_tickets(&prev, params);
        // vota com os três primeiros vencedores; os outros dois perdem
        let votes: Vec<Transaction> = winners[..3]
            .iter()
            .map(|winner| {
                let ticket = tickets.iter().find(|t| t.hash() == *winner).unwrap();
                vote_transaction(ticket, prev, height - 1, 1, 0, &[0x51])
            })
            .collect();

        let journal = store.connect_block(height, &prev, &votes, params).unwrap();
        assert_eq!(journal.voted.len(), 3);
        assert_eq!(journal.missed.len(), 2);
        assert_eq!(store.state().live_count(), 3);
        for (hash, _) in &journal.missed {
            assert!(store.state().is_missed(hash));
        }
    }

    #[test]
    fn test_vote_for_non_winner_rejected() {
        let params = simnet();
        let (mut store, tickets) = store_with_live_tickets(8);
        let height = params.subsidy.stake_validation_height;
        let prev = Hash256::blake256(b"tip");

        let winners = store.winning_tickets(&prev, params);
        let loser = tickets
            .iter()
            .find(|t| !winners.contains(&t.hash()))
            .expect("com 8 tickets e 5 vagas há perdedores");
        let vote = vote_transaction(loser, prev, height - 1, 1, 0, &[0x51]);

        let err = store.connect_block(height, &prev, &[vote], params).unwrap_err();
        assert_eq!(err, ValidationError::WinnerMismatch);
    }

    #[test]
    fn test_revocation_lifecycle() {
        let params = simnet();
        let (mut store, tickets) = store_with_live_tickets(8);
        let height = params.subsidy.stake_validation_height;
        let prev = Hash256::blake256(b"tip");

        // ninguém vota: todos os vencedores perdem
        let journal = store.connect_block(height, &prev, &[], params).unwrap();
        assert_eq!(journal.missed.len(), 5);

        let missed_hash = journal.missed[0].0;
        let ticket = tickets.iter().find(|t| t.hash() == missed_hash).unwrap();
        let revocation = revocation_transaction(ticket, &[0x51]);

        // revogar um ticket vivo falha; alturas abaixo da validação de
        // stake não sorteiam, o que isola o teste do passo de perdas
        let live_ticket = tickets
            .iter()
            .find(|t| store.state().is_live(&t.hash()))
            .unwrap();
        let bad = revocation_transaction(live_ticket, &[0x51]);
        assert!(store.connect_block(20, &prev, &[bad], params).is_err());

        store.connect_block(21, &prev, &[revocation], params).unwrap();
        assert!(store.state().is_revoked(&missed_hash));
        assert!(!store.state().is_missed(&missed_hash));
    }

    #[test]
    fn test_expiry_moves_live_to_missed() {
        let params = simnet();
        let (mut store, _) = store_with_live_tickets(8);

        // bem além da expiração: os cinco sorteados perdem por falta de
        // voto e os três restantes expiram
        let far = params.ticket_expiry + 2;
        let journal = store
            .connect_block(far, &Hash256::blake256(b"longe"), &[], params)
            .unwrap();
        assert_eq!(journal.missed.len(), 5);
        assert_eq!(journal.expired.len(), 3);
        assert_eq!(store.state().live_count(), 0);
        for (hash, _) in &journal.expired {
            assert!(store.state().is_missed(hash));
        }
    }

    #[test]
    fn test_connect_disconnect_round_trip() {
        let params = simnet();
        let (mut store, tickets) = store_with_live_tickets(8);
        let height = params.subsidy.stake_validation_height;
        let prev = Hash256::blake256(b"tip");

        let before = store.state().clone();
        let winners = store.winning_tickets(&prev, params);
        let ticket = tickets.iter().find(|t| t.hash() == winners[0]).unwrap();
        let vote = vote_transaction(ticket, prev, height - 1, 1, 0, &[0x51]);
        let purchase = new_ticket(99);

        let journal = store
            .connect_block(height, &prev, &[vote, purchase], params)
            .unwrap();
        assert_ne!(store.state(), &before);

        store.disconnect_block(&journal);
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn test_snapshot_survives_connect() {
        let params = simnet();
        let (mut store, _) = store_with_live_tickets(5);
        let view = store.snapshot();
        let live_before = view.live_count();

        store
            .connect_block(
                params.subsidy.stake_validation_height,
                &Hash256::blake256(b"tip"),
                &[],
                params,
            )
            .unwrap();

        assert_eq!(view.live_count(), live_before);
        assert_ne!(store.state().live_count(), live_before);
    }

    #[test]
    fn test_commit_writes_pool_buckets() {
        let params = simnet();
        let backend = MemoryKv::new();
        let (mut store, _) = store_with_live_tickets(3);

        let mut txn = backend.begin_write();
        store.commit(txn.as_mut()).unwrap();
        txn.commit().unwrap();

        let read = backend.begin_read();
        let live: Vec<_> = read.seek(BUCKET_STAKE_LIVE, &[]).collect();
        assert_eq!(live.len(), 3);
        for (_, value) in live {
            assert_eq!(decode_info(&value).unwrap().purchase_height, 1);
        }
    }
}
