//! Validação de blocos em três fases
//!
//! Fase 1: verificações livres de contexto (estrutura, merkle, prova de
//! trabalho). Fase 2: verificações contextuais do cabeçalho contra o
//! ancestral. Fase 3: verificações de bloco completo contra o estado de
//! UTXO e de stake, com os scripts por input distribuídos por um pool de
//! threads. Falhas das fases 1 e 2 invalidam o cabeçalho para sempre; as
//! da fase 3 invalidam apenas o bloco.

use shared::{Amount, CancelToken, Hash256};
use tracing::debug;

use crate::block::{Block, BlockHeader, BlockNonce};
use crate::difficulty::{hash_meets_target, next_stake_diff, next_work_bits};
use crate::equihash;
use crate::error::{DecodeError, PowError, ValidationError};
use crate::index::{ChainIndex, NodeId};
use crate::params::{AlgorithmId, ChainParams};
use crate::stake::{self, StakeJournal, StakeStore, StakeTx};
use crate::subsidy::SubsidyCache;
use crate::script;
use crate::transaction::{Transaction, TxTree};
use crate::utxo::{StakeKind, UtxoEntry, UtxoJournal, UtxoStore};

/// Journal composto de um bloco conectado
#[derive(Debug, Clone, Default)]
pub struct BlockJournal {
    pub utxo: UtxoJournal,
    pub stake: StakeJournal,
}

/// Fase 1: verificações livres de contexto
///
/// # Errors
///
/// Qualquer falha marca o cabeçalho (e os descendentes) como
/// permanentemente inválidos.
pub fn check_block_sanity(
    block: &Block,
    params: &ChainParams,
    cancel: &CancelToken,
) -> Result<(), ValidationError> {
    let header = &block.header;

    // limites de serialização
    let size = block.serialized_size();
    if size > params.max_block_size {
        return Err(DecodeError::OversizePayload {
            size,
            max: params.max_block_size,
        }
        .into());
    }

    // resolução de segundos no timestamp
    if header.timestamp.timestamp_subsec_nanos() != 0 {
        return Err(DecodeError::InvalidValue("sub-second timestamp".into()).into());
    }

    // árvore regular não vazia, coinbase única à cabeça
    if block.transactions.is_empty() {
        return Err(ValidationError::NoTransactions);
    }
    if !block.transactions[0].is_coinbase() {
        return Err(ValidationError::FirstTxNotCoinbase);
    }
    for tx in &block.transactions[1..] {
        if tx.is_coinbase() {
            return Err(ValidationError::BadCoinbase(
                "multiple coinbase transactions".into(),
            ));
        }
    }
    coinbase_height_commitment(&block.transactions[0], header.height)?;

    // sanidade de cada transação
    for tx in block.transactions.iter().chain(&block.stake_transactions) {
        check_transaction_sanity(tx, params)?;
    }

    // hashes duplicados entre ambas as árvores
    let mut seen: Vec<Hash256> = Vec::with_capacity(
        block.transactions.len() + block.stake_transactions.len(),
    );
    for tx in block.transactions.iter().chain(&block.stake_transactions) {
        let hash = tx.hash();
        if seen.contains(&hash) {
            return Err(ValidationError::DuplicateTx(hash));
        }
        seen.push(hash);
    }

    // merkle roots de ambas as árvores
    let merkle = block.merkle_root(params.legacy_merkle_hashing);
    if merkle != header.merkle_root {
        return Err(ValidationError::BadMerkleRoot {
            got: header.merkle_root,
            expected: merkle,
        });
    }
    let stake_root = block.stake_root(params.legacy_merkle_hashing);
    if stake_root != header.stake_root {
        return Err(ValidationError::BadStakeRoot {
            got: header.stake_root,
            expected: stake_root,
        });
    }

    // contagens de stake declaradas no cabeçalho
    check_stake_tallies(block)?;

    // algoritmo e prova de trabalho
    check_proof_of_work(header, params, cancel)
}

fn coinbase_height_commitment(
    coinbase: &Transaction,
    height: u32,
) -> Result<(), ValidationError> {
    let script_sig = &coinbase.inputs[0].signature_script;
    if script_sig.len() < 8 {
        return Err(ValidationError::BadCoinbase(
            "missing height commitment".into(),
        ));
    }
    let committed = u64::from_le_bytes(script_sig[..8].try_into().expect("8 bytes"));
    if committed != u64::from(height) {
        return Err(ValidationError::BadCoinbase(format!(
            "height commitment {committed} does not match header height {height}"
        )));
    }
    Ok(())
}

fn check_transaction_sanity(
    tx: &Transaction,
    params: &ChainParams,
) -> Result<(), ValidationError> {
    if tx.inputs.is_empty() {
        return Err(DecodeError::InvalidValue("transaction without inputs".into()).into());
    }
    let mut total: Amount = 0;
    for output in &tx.outputs {
        if output.value < 0 || output.value > params.max_amount() {
            return Err(
                DecodeError::InvalidValue(format!("output value {} out of range", output.value))
                    .into(),
            );
        }
        total = total.checked_add(output.value).ok_or_else(|| {
            ValidationError::from(DecodeError::InvalidValue("output total overflow".into()))
        })?;
    }
    if total > params.max_amount() {
        return Err(DecodeError::InvalidValue("output total out of range".into()).into());
    }
    Ok(())
}

fn check_stake_tallies(block: &Block) -> Result<(), ValidationError> {
    let mut votes = 0u16;
    let mut tickets = 0u8;
    let mut revocations = 0u8;
    for tx in &block.stake_transactions {
        match stake::classify(tx) {
            Some(StakeTx::Vote { .. }) => votes += 1,
            Some(StakeTx::Ticket) => tickets = tickets.saturating_add(1),
            Some(StakeTx::Revocation { .. }) => revocations = revocations.saturating_add(1),
            None => {
                return Err(ValidationError::BadTicketLifecycle(
                    "unrecognized stake transaction".into(),
                ))
            }
        }
    }

    let header = &block.header;
    if header.voters != votes {
        return Err(ValidationError::BadStakeTally(format!(
            "voters {} != votes {votes}",
            header.voters
        )));
    }
    if header.fresh_stake != tickets {
        return Err(ValidationError::BadStakeTally(format!(
            "fresh stake {} != tickets {tickets}",
            header.fresh_stake
        )));
    }
    if header.revocations != revocations {
        return Err(ValidationError::BadStakeTally(format!(
            "revocations {} != revocations {revocations}",
            header.revocations
        )));
    }
    Ok(())
}

fn check_proof_of_work(
    header: &BlockHeader,
    params: &ChainParams,
    cancel: &CancelToken,
) -> Result<(), ValidationError> {
    let algorithm = params.algorithm_at(header.height);
    match (algorithm, &header.nonce) {
        (AlgorithmId::V0, BlockNonce::V0(_)) => {
            if !header.equihash_solution.is_empty() {
                return Err(ValidationError::WrongAlgorithm {
                    height: header.height,
                });
            }
        }
        (AlgorithmId::V1Equihash { n, k }, BlockNonce::V1(nonce)) => {
            let verifier = equihash::Verifier::new(n, k);
            verifier.verify(
                &header.equihash_input(),
                nonce,
                &header.equihash_solution,
                cancel,
            )?;
        }
        _ => {
            return Err(ValidationError::WrongAlgorithm {
                height: header.height,
            })
        }
    }

    if !hash_meets_target(&header.pow_hash(), header.bits, &params.pow_limit) {
        return Err(PowError::HighHash.into());
    }
    Ok(())
}

/// Fase 2: verificações contextuais do cabeçalho
///
/// O chamador já resolveu o pai no índice; pai desconhecido é órfão e
/// tratado antes desta fase.
///
/// # Errors
///
/// Qualquer falha marca o cabeçalho como permanentemente inválido.
pub fn check_header_context(
    header: &BlockHeader,
    index: &ChainIndex,
    parent: NodeId,
    params: &ChainParams,
) -> Result<(), ValidationError> {
    let parent_node = index.node(parent);
    if parent_node.status.is_permanently_invalid() {
        return Err(ValidationError::InvalidAncestor);
    }

    if header.height != parent_node.height() + 1 {
        return Err(ValidationError::BadHeight {
            got: header.height,
            parent: parent_node.height(),
        });
    }

    if header.version < params.min_block_version {
        return Err(ValidationError::OldBlockVersion {
            got: header.version,
            required: params.min_block_version,
        });
    }

    // alturas fixadas por um ponto de finalidade só aceitam o hash fixado
    if let Some((_, pinned)) = params
        .checkpoints
        .iter()
        .find(|(h, _)| *h == header.height)
    {
        if header.hash() != *pinned {
            return Err(ValidationError::Stale {
                height: header.height,
            });
        }
    }

    let median = index.median_time_past(parent);
    if header.timestamp.timestamp() <= median {
        return Err(ValidationError::BadTimestamp {
            got: header.timestamp.timestamp(),
            median,
        });
    }

    let expected_bits = next_work_bits(index, parent, params);
    if header.bits != expected_bits {
        return Err(ValidationError::WrongBits {
            got: header.bits,
            expected: expected_bits,
        });
    }

    let expected_sbits = next_stake_diff(index, parent, params);
    if header.sbits != expected_sbits {
        return Err(ValidationError::WrongStakeDifficulty {
            got: header.sbits,
            expected: expected_sbits,
        });
    }

    // a seleção de algoritmo é função da altura; um cabeçalho com o nonce
    // errado nunca chega aqui, mas a fronteira é revalidada
    let algorithm = params.algorithm_at(header.height);
    let nonce_matches = matches!(
        (algorithm, &header.nonce),
        (AlgorithmId::V0, BlockNonce::V0(_)) | (AlgorithmId::V1Equihash { .. }, BlockNonce::V1(_))
    );
    if !nonce_matches {
        return Err(ValidationError::WrongAlgorithm {
            height: header.height,
        });
    }

    Ok(())
}

// Trabalho de script de um input, executado no pool
struct ScriptJob<'a> {
    tx: &'a Transaction,
    input_index: usize,
    pk_script: Vec<u8>,
    script_version: u16,
}

/// Fase 3: verificações de bloco completo e conexão ao estado
///
/// Em caso de erro, as alterações parciais às lojas são desfeitas antes
/// de devolver; nenhum journal parcial escapa.
///
/// # Errors
///
/// Falhas desta fase invalidam o bloco mas deixam o cabeçalho
/// revalidável.
pub fn connect_block(
    block: &Block,
    utxo: &mut UtxoStore,
    stake_store: &mut StakeStore,
    subsidy: &SubsidyCache,
    params: &ChainParams,
    cancel: &CancelToken,
) -> Result<BlockJournal, ValidationError> {
    match connect_block_inner(block, utxo, stake_store, subsidy, params, cancel) {
        Ok(journal) => Ok(journal),
        Err((err, partial)) => {
            // descarta os efeitos parciais pela ordem inversa
            utxo.disconnect_block(&partial.utxo);
            if !partial.stake.winners.is_empty()
                || !partial.stake.voted.is_empty()
                || !partial.stake.missed.is_empty()
                || !partial.stake.revoked.is_empty()
                || !partial.stake.matured.is_empty()
                || !partial.stake.purchased.is_empty()
                || !partial.stake.expired.is_empty()
            {
                stake_store.disconnect_block(&partial.stake);
            }
            Err(err)
        }
    }
}

#[allow(clippy::too_many_lines)]
fn connect_block_inner(
    block: &Block,
    utxo: &mut UtxoStore,
    stake_store: &mut StakeStore,
    subsidy: &SubsidyCache,
    params: &ChainParams,
    cancel: &CancelToken,
) -> Result<BlockJournal, (ValidationError, BlockJournal)> {
    let header = &block.header;
    let height = header.height;
    let mut journal = BlockJournal::default();

    // estado de stake primeiro: sorteio, ciclo de vida e tallies
    let stake_journal = stake_store
        .connect_block(height, &header.previous_hash, &block.stake_transactions, params)
        .map_err(|e| (e, BlockJournal::default()))?;
    journal.stake = stake_journal;

    let fail = |err: ValidationError, journal: &BlockJournal| (err, journal.clone());

    // mínimo de votos e estado final a partir da altura de validação
    if height >= params.subsidy.stake_validation_height {
        let required = params.minimum_votes();
        if header.voters < required {
            return Err(fail(
                ValidationError::TooFewVotes {
                    got: header.voters,
                    required,
                },
                &journal,
            ));
        }

        let expected_state = StakeStore::final_state(&journal.stake.winners);
        if header.final_state != expected_state {
            return Err(fail(
                ValidationError::FinalStateMismatch {
                    got: hex::encode(header.final_state),
                    expected: hex::encode(expected_state),
                },
                &journal,
            ));
        }
    }

    // o pool declarado no cabeçalho reflete o estado após a conexão
    let pool = stake_store.state().live_count() as u32;
    if header.pool_size != pool {
        return Err(fail(
            ValidationError::PoolSizeMismatch {
                got: header.pool_size,
                expected: pool,
            },
            &journal,
        ));
    }

    // conecta transações: árvore de stake primeiro, depois a regular;
    // scripts são acumulados e verificados em paralelo no fim
    let mut jobs: Vec<ScriptJob<'_>> = Vec::new();
    let mut total_fees: Amount = 0;

    let stake_txs = block
        .stake_transactions
        .iter()
        .map(|tx| (tx, TxTree::Stake));
    let regular_txs = block.transactions.iter().map(|tx| (tx, TxTree::Regular));

    for (block_index, (tx, tree)) in stake_txs.chain(regular_txs).enumerate() {
        if cancel.is_cancelled() {
            return Err(fail(ValidationError::Cancelled, &journal));
        }

        if tx.expiry != 0 && height >= tx.expiry {
            return Err(fail(
                ValidationError::ExpiredTransaction {
                    height,
                    expiry: tx.expiry,
                },
                &journal,
            ));
        }

        let kind = (tree == TxTree::Stake).then(|| stake::classify(tx)).flatten();
        if let Err(err) = check_tx_context(tx, tree, &kind, block, subsidy) {
            return Err(fail(err, &journal));
        }

        // valida os inputs contra o estado corrente antes de os gastar
        let mut resolved_in: Amount = 0;
        for (input_index, input) in tx.inputs.iter().enumerate() {
            if input.is_null_input() {
                continue;
            }
            let outpoint = input.previous_output;
            let Some(entry) = utxo.fetch(&outpoint) else {
                return Err(fail(ValidationError::MissingInput(outpoint), &journal));
            };
            if let Err(err) = check_spend_rules(entry, input_index, &kind, height, params) {
                return Err(fail(err, &journal));
            }
            if input.value_in != entry.value {
                return Err(fail(
                    ValidationError::ScriptFailure {
                        input_index,
                        reason: format!(
                            "declared input value {} does not match entry {}",
                            input.value_in, entry.value
                        ),
                    },
                    &journal,
                ));
            }
            resolved_in += entry.value;
            jobs.push(ScriptJob {
                tx,
                input_index,
                pk_script: entry.pk_script.clone(),
                script_version: entry.script_version,
            });
        }

        // equilíbrio de valores por transação
        let total_out = match tx.total_output_value() {
            Ok(value) => value,
            Err(e) => return Err(fail(e.into(), &journal)),
        };
        match kind {
            Some(StakeTx::Vote { .. }) => {
                let allowance = subsidy.vote_subsidy(height, false);
                if total_out > resolved_in + allowance {
                    return Err(fail(
                        ValidationError::ValueImbalance {
                            total_in: resolved_in + allowance,
                            total_out,
                        },
                        &journal,
                    ));
                }
            }
            _ if tx.is_coinbase() && tree == TxTree::Regular => {}
            _ => {
                if total_out > resolved_in {
                    return Err(fail(
                        ValidationError::ValueImbalance {
                            total_in: resolved_in,
                            total_out,
                        },
                        &journal,
                    ));
                }
                total_fees += resolved_in - total_out;
            }
        }

        match utxo.connect_transaction(tx, tree, height, block_index as u32) {
            Ok(undo) => journal.utxo.undos.push(undo),
            Err(err) => return Err(fail(err, &journal)),
        }
    }

    // a coinbase recolhe exatamente subsídio de trabalho mais taxas
    let work = subsidy.work_subsidy(height, header.voters, false);
    let expected_coinbase = work + total_fees;
    let coinbase_paid = block.transactions[0]
        .total_output_value()
        .map_err(|e| (ValidationError::from(e), journal.clone()))?;
    if coinbase_paid != expected_coinbase {
        return Err(fail(
            ValidationError::BadCoinbaseValue {
                paid: coinbase_paid,
                expected: expected_coinbase,
            },
            &journal,
        ));
    }

    // scripts por input em paralelo; primeiro erro cancela os restantes
    if let Err(err) = run_script_jobs(&jobs, cancel) {
        return Err(fail(err, &journal));
    }

    debug!(
        height,
        txs = block.transactions.len(),
        stake_txs = block.stake_transactions.len(),
        fees = total_fees,
        "bloco conectado"
    );
    Ok(journal)
}

// Regras contextuais por transação que não tocam o estado
fn check_tx_context(
    tx: &Transaction,
    tree: TxTree,
    kind: &Option<StakeTx>,
    block: &Block,
    subsidy: &SubsidyCache,
) -> Result<(), ValidationError> {
    let header = &block.header;
    match kind {
        Some(StakeTx::Vote {
            block_hash,
            block_height,
            ..
        }) => {
            // votos votam no pai do bloco que os inclui
            if *block_hash != header.previous_hash || *block_height != header.height - 1 {
                return Err(ValidationError::BadVote(format!(
                    "vote references {block_hash}:{block_height}, expected parent {}:{}",
                    header.previous_hash,
                    header.height - 1
                )));
            }
            // o stakebase declara exatamente o subsídio de voto
            let allowance = subsidy.vote_subsidy(header.height, false);
            if tx.inputs[0].value_in != allowance {
                return Err(ValidationError::BadVote(format!(
                    "stakebase declares {}, vote subsidy is {allowance}",
                    tx.inputs[0].value_in
                )));
            }
        }
        Some(StakeTx::Ticket) => {
            if tx.outputs[0].value < header.sbits {
                return Err(ValidationError::BadTicketSpend(format!(
                    "ticket pays {} below stake difficulty {}",
                    tx.outputs[0].value, header.sbits
                )));
            }
        }
        Some(StakeTx::Revocation { .. }) | None => {}
    }

    if tree == TxTree::Stake && kind.is_none() {
        return Err(ValidationError::BadTicketLifecycle(
            "unrecognized stake transaction".into(),
        ));
    }
    Ok(())
}

// Regras de gasto de uma entrada UTXO
fn check_spend_rules(
    entry: &UtxoEntry,
    input_index: usize,
    kind: &Option<StakeTx>,
    height: u32,
    params: &ChainParams,
) -> Result<(), ValidationError> {
    if entry.is_coinbase {
        let confirmations = height.saturating_sub(entry.height);
        if confirmations < params.coinbase_maturity {
            return Err(ValidationError::ImmatureCoinbaseSpend {
                created_height: entry.height,
                spend_height: height,
            });
        }
    }

    match entry.stake_kind {
        Some(StakeKind::TicketPurchase) => {
            // a saída de voto de um ticket só é consumível pelo voto ou
            // pela revogação correspondente
            let allowed = matches!(
                kind,
                Some(StakeTx::Vote { .. }) | Some(StakeTx::Revocation { .. })
            ) && input_index <= 1;
            if !allowed {
                return Err(ValidationError::BadTicketSpend(
                    "ticket output spent outside a vote or revocation".into(),
                ));
            }
        }
        Some(StakeKind::Vote | StakeKind::Revocation) => {
            // pagamentos de voto/revogação amadurecem como coinbase
            let confirmations = height.saturating_sub(entry.height);
            if confirmations < params.coinbase_maturity {
                return Err(ValidationError::ImmatureCoinbaseSpend {
                    created_height: entry.height,
                    spend_height: height,
                });
            }
        }
        Some(StakeKind::StakeChange) | None => {}
    }
    Ok(())
}

// Distribui os trabalhos de script por threads; sem estado partilhado
// mutável, cada trabalho lê uma entrada imutável.
fn run_script_jobs(jobs: &[ScriptJob<'_>], cancel: &CancelToken) -> Result<(), ValidationError> {
    if jobs.is_empty() {
        return Ok(());
    }

    let workers = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        .min(jobs.len());
    let chunk_size = jobs.len().div_ceil(workers);

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for chunk in jobs.chunks(chunk_size) {
            handles.push(scope.spawn(move || -> Result<(), ValidationError> {
                for job in chunk {
                    if cancel.is_cancelled() {
                        return Err(ValidationError::Cancelled);
                    }
                    let result = script::verify_spend(
                        job.tx,
                        job.input_index,
                        &job.pk_script,
                        job.script_version,
                    );
                    let outcome = match result {
                        Err(script::ScriptError::UnsupportedVersion(_)) => {
                            Err(ValidationError::ScriptVersionMismatch {
                                input_index: job.input_index,
                            })
                        }
                        Err(err) => Err(ValidationError::ScriptFailure {
                            input_index: job.input_index,
                            reason: err.to_string(),
                        }),
                        Ok(run) if !run.valid || !run.clean_stack => {
                            Err(ValidationError::ScriptFailure {
                                input_index: job.input_index,
                                reason: if run.valid {
                                    "unclean stack".into()
                                } else {
                                    "script evaluated to false".into()
                                },
                            })
                        }
                        Ok(_) => Ok(()),
                    };
                    if let Err(err) = outcome {
                        cancel.cancel();
                        return Err(err);
                    }
                }
                Ok(())
            }));
        }

        let mut first_error = None;
        for handle in handles {
            if let Err(err) = handle.join().expect("worker de scripts não entra em pânico") {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })
}
