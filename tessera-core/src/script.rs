//! Stack-based script engine for spend validation
//!
//! Big-endian stack of byte vectors, arithmetic over minimally-encoded
//! signed integers of at most 4 bytes, hash opcodes over the consensus
//! digests and signature checks dispatched on a signature-type byte.
//! Stake opcodes tag outputs as ticket purchases, votes, revocations or
//! stake change; they execute as no-ops and gate spending contextually.

use shared::{verify_hash, SignatureAlgorithm};
use thiserror::Error;

use crate::transaction::Transaction;

/// Maximum script size in bytes
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum number of non-push operations per script
pub const MAX_OPS_PER_SCRIPT: usize = 255;

/// Maximum stack depth (main plus alt)
pub const MAX_STACK_SIZE: usize = 1_024;

/// Maximum size of a pushed element
pub const MAX_ELEMENT_SIZE: usize = 2_048;

/// Maximum public keys admitted by OP_CHECKMULTISIG
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Script opcodes
#[allow(missing_docs)]
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_DATA_1: u8 = 0x01;
    pub const OP_DATA_75: u8 = 0x4b;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;

    pub const OP_NOP: u8 = 0x61;
    pub const OP_IF: u8 = 0x63;
    pub const OP_NOTIF: u8 = 0x64;
    pub const OP_ELSE: u8 = 0x67;
    pub const OP_ENDIF: u8 = 0x68;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;

    pub const OP_TOALTSTACK: u8 = 0x6b;
    pub const OP_FROMALTSTACK: u8 = 0x6c;
    pub const OP_2DUP: u8 = 0x6e;
    pub const OP_DEPTH: u8 = 0x74;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_NIP: u8 = 0x77;
    pub const OP_OVER: u8 = 0x78;
    pub const OP_ROT: u8 = 0x7b;
    pub const OP_SWAP: u8 = 0x7c;
    pub const OP_TUCK: u8 = 0x7d;

    pub const OP_CAT: u8 = 0x7e;
    pub const OP_SUBSTR: u8 = 0x7f;
    pub const OP_SIZE: u8 = 0x82;

    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;

    pub const OP_1ADD: u8 = 0x8b;
    pub const OP_1SUB: u8 = 0x8c;
    pub const OP_NEGATE: u8 = 0x8f;
    pub const OP_ABS: u8 = 0x90;
    pub const OP_NOT: u8 = 0x91;
    pub const OP_0NOTEQUAL: u8 = 0x92;
    pub const OP_ADD: u8 = 0x93;
    pub const OP_SUB: u8 = 0x94;
    pub const OP_MUL: u8 = 0x95;
    pub const OP_DIV: u8 = 0x96;
    pub const OP_MOD: u8 = 0x97;
    pub const OP_LSHIFT: u8 = 0x98;
    pub const OP_RSHIFT: u8 = 0x99;
    pub const OP_BOOLAND: u8 = 0x9a;
    pub const OP_BOOLOR: u8 = 0x9b;
    pub const OP_NUMEQUAL: u8 = 0x9c;
    pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
    pub const OP_NUMNOTEQUAL: u8 = 0x9e;
    pub const OP_LESSTHAN: u8 = 0x9f;
    pub const OP_GREATERTHAN: u8 = 0xa0;
    pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
    pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
    pub const OP_MIN: u8 = 0xa3;
    pub const OP_MAX: u8 = 0xa4;
    pub const OP_WITHIN: u8 = 0xa5;

    pub const OP_RIPEMD160: u8 = 0xa6;
    pub const OP_BLAKE256: u8 = 0xa7;
    pub const OP_SHA256: u8 = 0xa8;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_HASH256: u8 = 0xaa;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

    pub const OP_SSTX: u8 = 0xba;
    pub const OP_SSGEN: u8 = 0xbb;
    pub const OP_SSRTX: u8 = 0xbc;
    pub const OP_SSTXCHANGE: u8 = 0xbd;
}

use opcodes::*;

/// Execution failures of the script engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack size limit exceeded")]
    StackOverflow,

    #[error("script larger than {MAX_SCRIPT_SIZE} bytes")]
    ScriptTooLarge,

    #[error("pushed element larger than {MAX_ELEMENT_SIZE} bytes")]
    ElementTooLarge,

    #[error("operation count limit exceeded")]
    TooManyOps,

    #[error("non-minimal data push")]
    NonMinimalPush,

    #[error("malformed data push")]
    MalformedPush,

    #[error("disabled opcode 0x{0:02x} present in executed branch")]
    DisabledOpcode(u8),

    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("OP_RETURN evaluated")]
    OpReturn,

    #[error("OP_VERIFY failed")]
    VerifyFailed,

    #[error("unbalanced conditional")]
    UnbalancedConditional,

    #[error("number overflows 4-byte script integer")]
    NumberOverflow,

    #[error("non-minimal number encoding")]
    NonMinimalNumber,

    #[error("too many public keys in multisig")]
    TooManyPubkeys,

    #[error("signature script is not push-only")]
    SigScriptNotPushOnly,

    #[error("unsupported script version {0}")]
    UnsupportedVersion(u16),
}

/// Resultado da execução para um input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    /// A pilha terminou com topo verdadeiro e sem erro
    pub valid: bool,
    /// Restava exatamente um elemento no fim
    pub clean_stack: bool,
}

/// Contexto de verificação de assinaturas de um input
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
}

// Estado de um ramo condicional
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Executing,
    Skipping,
    // ramo já consumiu o seu OP_ELSE
    Done,
}

/// Máquina de pilha do motor de scripts
#[derive(Debug, Default)]
pub struct ScriptVM {
    stack: Vec<Vec<u8>>,
    alt_stack: Vec<Vec<u8>>,
    branches: Vec<Branch>,
    op_count: usize,
}

impl ScriptVM {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executa um script sobre a pilha corrente
    ///
    /// # Errors
    ///
    /// Devolve a falha de execução; a pilha fica num estado indefinido.
    pub fn execute(&mut self, script: &[u8], ctx: &ScriptContext<'_>) -> Result<(), ScriptError> {
        if script.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptTooLarge);
        }

        let mut pc = 0usize;
        while pc < script.len() {
            let opcode = script[pc];
            pc += 1;

            let executing = self.branches.iter().all(|b| *b == Branch::Executing);

            // Pushes são lidos mesmo em ramos não executados, para manter
            // o program counter alinhado.
            if opcode <= OP_PUSHDATA4 {
                let (data, next_pc) = read_push(script, pc, opcode)?;
                pc = next_pc;
                if executing {
                    self.push(data)?;
                }
                continue;
            }

            if is_disabled(opcode) {
                // Presença num ramo executado ou não é sempre fatal
                return Err(ScriptError::DisabledOpcode(opcode));
            }

            self.op_count += 1;
            if self.op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::TooManyOps);
            }

            // Fluxo condicional corre sempre, para equilibrar os ramos
            match opcode {
                OP_IF | OP_NOTIF => {
                    let branch = if executing {
                        let cond = as_bool(&self.pop()?);
                        let take = if opcode == OP_IF { cond } else { !cond };
                        if take {
                            Branch::Executing
                        } else {
                            Branch::Skipping
                        }
                    } else {
                        Branch::Done
                    };
                    self.branches.push(branch);
                    continue;
                }
                OP_ELSE => {
                    match self.branches.last_mut() {
                        None => return Err(ScriptError::UnbalancedConditional),
                        Some(branch) => {
                            *branch = match branch {
                                Branch::Executing => Branch::Done,
                                Branch::Skipping => Branch::Executing,
                                Branch::Done => Branch::Done,
                            };
                        }
                    }
                    continue;
                }
                OP_ENDIF => {
                    if self.branches.pop().is_none() {
                        return Err(ScriptError::UnbalancedConditional);
                    }
                    continue;
                }
                _ => {}
            }

            if !executing {
                continue;
            }

            self.execute_opcode(opcode, script, ctx)?;
        }

        if !self.branches.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn execute_opcode(
        &mut self,
        opcode: u8,
        script: &[u8],
        ctx: &ScriptContext<'_>,
    ) -> Result<(), ScriptError> {
        match opcode {
            OP_1NEGATE => self.push(encode_num(-1))?,
            OP_1..=OP_16 => self.push(encode_num(i64::from(opcode - OP_1 + 1)))?,

            OP_NOP => {}
            // Opcodes de stake: marcam outputs, execução é neutra
            OP_SSTX | OP_SSGEN | OP_SSRTX | OP_SSTXCHANGE => {}

            OP_VERIFY => {
                let top = self.pop()?;
                if !as_bool(&top) {
                    return Err(ScriptError::VerifyFailed);
                }
            }
            OP_RETURN => return Err(ScriptError::OpReturn),

            OP_TOALTSTACK => {
                let top = self.pop()?;
                self.alt_stack.push(top);
            }
            OP_FROMALTSTACK => {
                let top = self.alt_stack.pop().ok_or(ScriptError::StackUnderflow)?;
                self.push(top)?;
            }
            OP_2DUP => {
                let (b, a) = (self.peek(0)?.clone(), self.peek(1)?.clone());
                self.push(a)?;
                self.push(b)?;
            }
            OP_DEPTH => {
                let depth = self.stack.len() as i64;
                self.push(encode_num(depth))?;
            }
            OP_DROP => {
                self.pop()?;
            }
            OP_DUP => {
                let top = self.peek(0)?.clone();
                self.push(top)?;
            }
            OP_NIP => {
                let top = self.pop()?;
                self.pop()?;
                self.push(top)?;
            }
            OP_OVER => {
                let second = self.peek(1)?.clone();
                self.push(second)?;
            }
            OP_ROT => {
                if self.stack.len() < 3 {
                    return Err(ScriptError::StackUnderflow);
                }
                let len = self.stack.len();
                let third = self.stack.remove(len - 3);
                self.stack.push(third);
            }
            OP_SWAP => {
                if self.stack.len() < 2 {
                    return Err(ScriptError::StackUnderflow);
                }
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            OP_TUCK => {
                let top = self.pop()?;
                let second = self.pop()?;
                self.push(top.clone())?;
                self.push(second)?;
                self.push(top)?;
            }
            OP_SIZE => {
                let len = self.peek(0)?.len() as i64;
                self.push(encode_num(len))?;
            }

            OP_EQUAL => {
                let (b, a) = (self.pop()?, self.pop()?);
                self.push_bool(a == b)?;
            }
            OP_EQUALVERIFY => {
                let (b, a) = (self.pop()?, self.pop()?);
                if a != b {
                    return Err(ScriptError::VerifyFailed);
                }
            }

            OP_1ADD => self.unary_num(|a| a + 1)?,
            OP_1SUB => self.unary_num(|a| a - 1)?,
            OP_NEGATE => self.unary_num(|a| -a)?,
            OP_ABS => self.unary_num(i64::abs)?,
            OP_NOT => self.unary_num(|a| i64::from(a == 0))?,
            OP_0NOTEQUAL => self.unary_num(|a| i64::from(a != 0))?,
            OP_ADD => self.binary_num(|a, b| a + b)?,
            OP_SUB => self.binary_num(|a, b| a - b)?,
            OP_BOOLAND => self.binary_num(|a, b| i64::from(a != 0 && b != 0))?,
            OP_BOOLOR => self.binary_num(|a, b| i64::from(a != 0 || b != 0))?,
            OP_NUMEQUAL => self.binary_num(|a, b| i64::from(a == b))?,
            OP_NUMEQUALVERIFY => {
                let (b, a) = (self.pop_num()?, self.pop_num()?);
                if a != b {
                    return Err(ScriptError::VerifyFailed);
                }
            }
            OP_NUMNOTEQUAL => self.binary_num(|a, b| i64::from(a != b))?,
            OP_LESSTHAN => self.binary_num(|a, b| i64::from(a < b))?,
            OP_GREATERTHAN => self.binary_num(|a, b| i64::from(a > b))?,
            OP_LESSTHANOREQUAL => self.binary_num(|a, b| i64::from(a <= b))?,
            OP_GREATERTHANOREQUAL => self.binary_num(|a, b| i64::from(a >= b))?,
            OP_MIN => self.binary_num(i64::min)?,
            OP_MAX => self.binary_num(i64::max)?,
            OP_WITHIN => {
                let max = self.pop_num()?;
                let min = self.pop_num()?;
                let x = self.pop_num()?;
                self.push_bool(x >= min && x < max)?;
            }

            OP_RIPEMD160 => self.hash_op(|data| {
                use ripemd::Digest;
                ripemd::Ripemd160::digest(data).to_vec()
            })?,
            OP_BLAKE256 => {
                self.hash_op(|data| shared::Hash256::blake256(data).as_bytes().to_vec())?;
            }
            OP_SHA256 => self.hash_op(|data| {
                use sha2::Digest;
                sha2::Sha256::digest(data).to_vec()
            })?,
            OP_HASH160 => self.hash_op(|data| {
                use ripemd::Digest;
                let blake = shared::Hash256::blake256(data);
                ripemd::Ripemd160::digest(blake.as_bytes()).to_vec()
            })?,
            OP_HASH256 => {
                self.hash_op(|data| shared::Hash256::blake256d(data).as_bytes().to_vec())?;
            }

            OP_CHECKSIG => {
                let ok = self.check_sig(script, ctx)?;
                self.push_bool(ok)?;
            }
            OP_CHECKSIGVERIFY => {
                if !self.check_sig(script, ctx)? {
                    return Err(ScriptError::VerifyFailed);
                }
            }
            OP_CHECKMULTISIG => {
                let ok = self.check_multisig(script, ctx)?;
                self.push_bool(ok)?;
            }
            OP_CHECKMULTISIGVERIFY => {
                if !self.check_multisig(script, ctx)? {
                    return Err(ScriptError::VerifyFailed);
                }
            }

            other => return Err(ScriptError::UnknownOpcode(other)),
        }
        Ok(())
    }

    // Assinatura com byte de tipo no fim: o algoritmo decide o verificador
    fn check_sig(&mut self, script: &[u8], ctx: &ScriptContext<'_>) -> Result<bool, ScriptError> {
        let pubkey = self.pop()?;
        let signature = self.pop()?;

        let Some((&type_byte, sig_bytes)) = signature.split_last() else {
            return Ok(false);
        };
        let Ok(algorithm) = SignatureAlgorithm::try_from(type_byte) else {
            return Ok(false);
        };

        let digest = ctx.tx.sig_hash(script, ctx.input_index);
        Ok(verify_hash(algorithm, &pubkey, &digest, sig_bytes).unwrap_or(false))
    }

    fn check_multisig(
        &mut self,
        script: &[u8],
        ctx: &ScriptContext<'_>,
    ) -> Result<bool, ScriptError> {
        let num_keys = usize::try_from(self.pop_num()?).map_err(|_| ScriptError::TooManyPubkeys)?;
        if num_keys > MAX_PUBKEYS_PER_MULTISIG {
            return Err(ScriptError::TooManyPubkeys);
        }
        let mut pubkeys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            pubkeys.push(self.pop()?);
        }

        let num_sigs = usize::try_from(self.pop_num()?).map_err(|_| ScriptError::StackUnderflow)?;
        if num_sigs > num_keys {
            return Ok(false);
        }
        let mut signatures = Vec::with_capacity(num_sigs);
        for _ in 0..num_sigs {
            signatures.push(self.pop()?);
        }

        let digest = ctx.tx.sig_hash(script, ctx.input_index);

        // Cada assinatura tem de casar com uma chave ainda não usada, pela
        // ordem das chaves.
        let mut key_idx = 0usize;
        for signature in &signatures {
            let Some((&type_byte, sig_bytes)) = signature.split_last() else {
                return Ok(false);
            };
            let Ok(algorithm) = SignatureAlgorithm::try_from(type_byte) else {
                return Ok(false);
            };
            let mut matched = false;
            while key_idx < pubkeys.len() {
                let pubkey = &pubkeys[key_idx];
                key_idx += 1;
                if verify_hash(algorithm, pubkey, &digest, sig_bytes).unwrap_or(false) {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn hash_op(&mut self, hash: impl Fn(&[u8]) -> Vec<u8>) -> Result<(), ScriptError> {
        let data = self.pop()?;
        self.push(hash(&data))
    }

    fn unary_num(&mut self, f: impl Fn(i64) -> i64) -> Result<(), ScriptError> {
        let a = self.pop_num()?;
        self.push(encode_num(f(a)))
    }

    fn binary_num(&mut self, f: impl Fn(i64, i64) -> i64) -> Result<(), ScriptError> {
        let b = self.pop_num()?;
        let a = self.pop_num()?;
        self.push(encode_num(f(a, b)))
    }

    fn push(&mut self, data: Vec<u8>) -> Result<(), ScriptError> {
        if data.len() > MAX_ELEMENT_SIZE {
            return Err(ScriptError::ElementTooLarge);
        }
        if self.stack.len() + self.alt_stack.len() + 1 > MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
        self.stack.push(data);
        Ok(())
    }

    fn push_bool(&mut self, value: bool) -> Result<(), ScriptError> {
        self.push(if value { vec![1] } else { Vec::new() })
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn pop_num(&mut self) -> Result<i64, ScriptError> {
        let bytes = self.pop()?;
        decode_num(&bytes)
    }

    fn peek(&self, depth: usize) -> Result<&Vec<u8>, ScriptError> {
        if depth >= self.stack.len() {
            return Err(ScriptError::StackUnderflow);
        }
        Ok(&self.stack[self.stack.len() - 1 - depth])
    }
}

/// Valida o gasto de um output: corre o script de assinatura (apenas
/// pushes) e depois o script do output sobre a mesma pilha
///
/// # Errors
///
/// Devolve erro de versão de script não suportada; falhas de execução
/// são reportadas como `valid == false`.
pub fn verify_spend(
    tx: &Transaction,
    input_index: usize,
    pk_script: &[u8],
    script_version: u16,
) -> Result<ExecutionResult, ScriptError> {
    if script_version != 0 {
        return Err(ScriptError::UnsupportedVersion(script_version));
    }

    let ctx = ScriptContext { tx, input_index };
    let signature_script = &tx.inputs[input_index].signature_script;

    if !is_push_only(signature_script) {
        return Err(ScriptError::SigScriptNotPushOnly);
    }

    let mut vm = ScriptVM::new();
    // Outputs de stake carregam o opcode de marcação à cabeça; ele executa
    // como NOP, por isso o script corre inalterado.
    let run = vm
        .execute(signature_script, &ctx)
        .and_then(|()| vm.execute(pk_script, &ctx));

    match run {
        Err(_) => Ok(ExecutionResult {
            valid: false,
            clean_stack: false,
        }),
        Ok(()) => {
            let top_true = vm.stack.last().is_some_and(|top| as_bool(top));
            Ok(ExecutionResult {
                valid: top_true,
                clean_stack: vm.stack.len() == 1,
            })
        }
    }
}

/// Verifica se um script só contém pushes canónicos
#[must_use]
pub fn is_push_only(script: &[u8]) -> bool {
    let mut pc = 0usize;
    while pc < script.len() {
        let opcode = script[pc];
        pc += 1;
        if opcode <= OP_PUSHDATA4 {
            match read_push(script, pc, opcode) {
                Ok((_, next)) => pc = next,
                Err(_) => return false,
            }
        } else if !(opcode == OP_1NEGATE || (OP_1..=OP_16).contains(&opcode)) {
            return false;
        }
    }
    true
}

// Lê um push canónico; devolve os dados e o novo program counter
fn read_push(script: &[u8], pc: usize, opcode: u8) -> Result<(Vec<u8>, usize), ScriptError> {
    let (len, data_start) = match opcode {
        OP_0 => (0usize, pc),
        OP_DATA_1..=OP_DATA_75 => (opcode as usize, pc),
        OP_PUSHDATA1 => {
            let len = *script.get(pc).ok_or(ScriptError::MalformedPush)? as usize;
            if len <= OP_DATA_75 as usize {
                return Err(ScriptError::NonMinimalPush);
            }
            (len, pc + 1)
        }
        OP_PUSHDATA2 => {
            let bytes: [u8; 2] = script
                .get(pc..pc + 2)
                .ok_or(ScriptError::MalformedPush)?
                .try_into()
                .expect("duas posições");
            let len = u16::from_le_bytes(bytes) as usize;
            if len <= 0xff {
                return Err(ScriptError::NonMinimalPush);
            }
            (len, pc + 2)
        }
        OP_PUSHDATA4 => {
            let bytes: [u8; 4] = script
                .get(pc..pc + 4)
                .ok_or(ScriptError::MalformedPush)?
                .try_into()
                .expect("quatro posições");
            let len = u32::from_le_bytes(bytes) as usize;
            if len <= 0xffff {
                return Err(ScriptError::NonMinimalPush);
            }
            (len, pc + 4)
        }
        _ => unreachable!("opcode de push verificado pelo chamador"),
    };

    let data = script
        .get(data_start..data_start + len)
        .ok_or(ScriptError::MalformedPush)?
        .to_vec();
    Ok((data, data_start + len))
}

const fn is_disabled(opcode: u8) -> bool {
    matches!(
        opcode,
        OP_CAT | OP_SUBSTR | OP_MUL | OP_DIV | OP_MOD | OP_LSHIFT | OP_RSHIFT
    )
}

/// Interpretação booleana de um elemento da pilha
#[must_use]
pub fn as_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            // zero negativo é falso
            return !(i == data.len() - 1 && byte == 0x80);
        }
    }
    false
}

/// Codifica um inteiro de script na forma mínima little-endian com
/// sinal-magnitude
#[must_use]
pub fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out.last().is_some_and(|&b| b & 0x80 != 0) {
        out.push(if negative { 0x80 } else { 0 });
    } else if negative {
        let last = out.last_mut().expect("valor não nulo");
        *last |= 0x80;
    }
    out
}

/// Decodifica um inteiro de script, exigindo forma mínima e ≤ 4 bytes
///
/// # Errors
///
/// Retorna erro com mais de 4 bytes ou codificação não mínima
pub fn decode_num(data: &[u8]) -> Result<i64, ScriptError> {
    if data.is_empty() {
        return Ok(0);
    }
    if data.len() > 4 {
        return Err(ScriptError::NumberOverflow);
    }
    let last = data[data.len() - 1];
    if last & 0x7f == 0 {
        // o byte alto só com o bit de sinal exige um byte anterior com o
        // bit 7 ligado, senão a forma não é mínima
        if data.len() == 1 || data[data.len() - 2] & 0x80 == 0 {
            return Err(ScriptError::NonMinimalNumber);
        }
    }

    let mut value: i64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        let masked = if i == data.len() - 1 { byte & 0x7f } else { byte };
        value |= i64::from(masked) << (8 * i);
    }
    if last & 0x80 != 0 {
        value = -value;
    }
    Ok(value)
}

/// Construtor de scripts com pushes canónicos
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn push_opcode(mut self, opcode: u8) -> Self {
        self.script.push(opcode);
        self
    }

    /// Push canónico de dados arbitrários
    #[must_use]
    pub fn push_data(mut self, data: &[u8]) -> Self {
        match data.len() {
            0 => self.script.push(OP_0),
            1..=75 => {
                self.script.push(data.len() as u8);
                self.script.extend_from_slice(data);
            }
            76..=0xff => {
                self.script.push(OP_PUSHDATA1);
                self.script.push(data.len() as u8);
                self.script.extend_from_slice(data);
            }
            0x100..=0xffff => {
                self.script.push(OP_PUSHDATA2);
                self.script.extend_from_slice(&(data.len() as u16).to_le_bytes());
                self.script.extend_from_slice(data);
            }
            _ => {
                self.script.push(OP_PUSHDATA4);
                self.script.extend_from_slice(&(data.len() as u32).to_le_bytes());
                self.script.extend_from_slice(data);
            }
        }
        self
    }

    /// Push canónico de um número de script
    #[must_use]
    pub fn push_number(self, value: i64) -> Self {
        match value {
            0 => self.push_opcode(OP_0),
            -1 => self.push_opcode(OP_1NEGATE),
            1..=16 => self.push_opcode(OP_1 + (value as u8) - 1),
            _ => {
                let encoded = encode_num(value);
                self.push_data(&encoded)
            }
        }
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.script
    }
}

/// Script pay-to-pubkey-hash padrão
#[must_use]
pub fn pay_to_pubkey_hash(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    ScriptBuilder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_data(pubkey_hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .build()
}

/// Script de desbloqueio para pay-to-pubkey-hash
#[must_use]
pub fn pay_to_pubkey_hash_unlock(signature: &[u8], pubkey: &[u8]) -> Vec<u8> {
    ScriptBuilder::new()
        .push_data(signature)
        .push_data(pubkey)
        .build()
}

/// HASH160 de uma chave pública (ripemd160 ∘ blake256)
#[must_use]
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::Digest;
    let blake = shared::Hash256::blake256(data);
    ripemd::Ripemd160::digest(blake.as_bytes()).into()
}

/// Prefixa um script com o opcode de marcação de stake dado
#[must_use]
pub fn stake_tagged(tag: u8, script: &[u8]) -> Vec<u8> {
    debug_assert!(matches!(tag, OP_SSTX | OP_SSGEN | OP_SSRTX | OP_SSTXCHANGE));
    let mut out = Vec::with_capacity(script.len() + 1);
    out.push(tag);
    out.extend_from_slice(script);
    out
}

/// Opcode de marcação de stake de um script, se houver
#[must_use]
pub fn stake_tag(script: &[u8]) -> Option<u8> {
    match script.first() {
        Some(&tag) if matches!(tag, OP_SSTX | OP_SSGEN | OP_SSRTX | OP_SSTXCHANGE) => Some(tag),
        _ => None,
    }
}

/// Script provadamente não gastável transportando dados
#[must_use]
pub fn null_data_script(data: &[u8]) -> Vec<u8> {
    ScriptBuilder::new()
        .push_opcode(OP_RETURN)
        .push_data(data)
        .build()
}

/// Extrai o payload de um script null-data (OP_RETURN ‖ push único)
#[must_use]
pub fn null_data_payload(script: &[u8]) -> Option<Vec<u8>> {
    if script.first() != Some(&OP_RETURN) {
        return None;
    }
    let body = &script[1..];
    if body.is_empty() {
        return Some(Vec::new());
    }
    if body[0] > OP_PUSHDATA4 {
        return None;
    }
    let (data, end) = read_push(body, 1, body[0]).ok()?;
    (end == body.len()).then_some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{OutPoint, TxInput, TxOutput};
    use shared::{sign_hash, Hash256, KeyPair};

    fn dummy_tx() -> Transaction {
        Transaction::new(
            1,
            vec![TxInput::new(
                OutPoint::new(Hash256::blake256(b"prev"), 0, crate::transaction::TxTree::Regular),
                1000,
                Vec::new(),
            )],
            vec![TxOutput::new(900, Vec::new())],
        )
    }

    fn run(script: &[u8]) -> Result<ScriptVM, ScriptError> {
        let tx = dummy_tx();
        let ctx = ScriptContext {
            tx: &tx,
            input_index: 0,
        };
        let mut vm = ScriptVM::new();
        vm.execute(script, &ctx)?;
        Ok(vm)
    }

    #[test]
    fn test_number_encoding_minimal() {
        assert_eq!(encode_num(0), Vec::<u8>::new());
        assert_eq!(encode_num(1), vec![1]);
        assert_eq!(encode_num(-1), vec![0x81]);
        assert_eq!(encode_num(127), vec![0x7f]);
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_num(-128), vec![0x80, 0x80]);
        assert_eq!(encode_num(256), vec![0x00, 0x01]);

        for value in [-70000i64, -129, -1, 0, 1, 127, 128, 255, 256, 70000] {
            assert_eq!(decode_num(&encode_num(value)).unwrap(), value, "{value}");
        }
    }

    #[test]
    fn test_number_decoding_rejects_non_minimal() {
        assert_eq!(decode_num(&[0x01, 0x00]), Err(ScriptError::NonMinimalNumber));
        assert_eq!(decode_num(&[0x00]), Err(ScriptError::NonMinimalNumber));
        assert_eq!(
            decode_num(&[1, 2, 3, 4, 5]),
            Err(ScriptError::NumberOverflow)
        );
        // 0x80 no topo com bit 7 no byte anterior é mínimo
        assert_eq!(decode_num(&[0xff, 0x80]).unwrap(), -255);
    }

    #[test]
    fn test_boolean_interpretation() {
        assert!(!as_bool(&[]));
        assert!(!as_bool(&[0]));
        assert!(!as_bool(&[0, 0x80])); // zero negativo
        assert!(as_bool(&[1]));
        assert!(as_bool(&[0, 1]));
    }

    #[test]
    fn test_arithmetic_script() {
        let script = ScriptBuilder::new()
            .push_number(10)
            .push_number(20)
            .push_opcode(OP_ADD)
            .push_number(30)
            .push_opcode(OP_NUMEQUAL)
            .build();
        let vm = run(&script).unwrap();
        assert!(as_bool(vm.stack.last().unwrap()));
    }

    #[test]
    fn test_stack_underflow() {
        assert_eq!(run(&[OP_ADD]).unwrap_err(), ScriptError::StackUnderflow);
        assert_eq!(run(&[OP_DUP]).unwrap_err(), ScriptError::StackUnderflow);
    }

    #[test]
    fn test_disabled_opcode_fails_even_unexecuted() {
        let script = ScriptBuilder::new()
            .push_number(0)
            .push_opcode(OP_IF)
            .push_opcode(OP_MUL)
            .push_opcode(OP_ENDIF)
            .push_number(1)
            .build();
        assert_eq!(run(&script).unwrap_err(), ScriptError::DisabledOpcode(OP_MUL));
    }

    #[test]
    fn test_conditional_branches() {
        let script = ScriptBuilder::new()
            .push_number(1)
            .push_opcode(OP_IF)
            .push_number(7)
            .push_opcode(OP_ELSE)
            .push_number(9)
            .push_opcode(OP_ENDIF)
            .build();
        let vm = run(&script).unwrap();
        assert_eq!(vm.stack, vec![encode_num(7)]);

        let script = ScriptBuilder::new()
            .push_number(0)
            .push_opcode(OP_NOTIF)
            .push_number(5)
            .push_opcode(OP_ENDIF)
            .build();
        let vm = run(&script).unwrap();
        assert_eq!(vm.stack, vec![encode_num(5)]);
    }

    #[test]
    fn test_unbalanced_conditional() {
        let script = ScriptBuilder::new().push_number(1).push_opcode(OP_IF).build();
        assert_eq!(run(&script).unwrap_err(), ScriptError::UnbalancedConditional);
        assert_eq!(run(&[OP_ENDIF]).unwrap_err(), ScriptError::UnbalancedConditional);
    }

    #[test]
    fn test_op_return_fails() {
        let script = null_data_script(b"dados");
        assert_eq!(run(&script).unwrap_err(), ScriptError::OpReturn);
    }

    #[test]
    fn test_non_minimal_push_rejected() {
        // PUSHDATA1 com 3 bytes deveria ser push direto
        let script = vec![OP_PUSHDATA1, 3, 1, 2, 3];
        assert_eq!(run(&script).unwrap_err(), ScriptError::NonMinimalPush);
    }

    #[test]
    fn test_stake_opcodes_are_neutral() {
        let script = ScriptBuilder::new()
            .push_opcode(OP_SSTX)
            .push_number(1)
            .build();
        let vm = run(&script).unwrap();
        assert!(as_bool(vm.stack.last().unwrap()));

        assert_eq!(stake_tag(&stake_tagged(OP_SSGEN, &[OP_1])), Some(OP_SSGEN));
        assert_eq!(stake_tag(&[OP_DUP]), None);
    }

    fn checksig_round_trip(algorithm: shared::SignatureAlgorithm) {
        let pair = KeyPair::generate(algorithm).unwrap();
        let pk_script = pay_to_pubkey_hash(&hash160(pair.public_key.as_bytes()));

        let mut tx = dummy_tx();
        let digest = tx.sig_hash(&pk_script, 0);
        let mut signature = sign_hash(&pair.private_key, &digest).unwrap();
        signature.push(algorithm as u8);
        tx.inputs[0].signature_script =
            pay_to_pubkey_hash_unlock(&signature, pair.public_key.as_bytes());

        let result = verify_spend(&tx, 0, &pk_script, 0).unwrap();
        assert!(result.valid, "{algorithm:?}");
        assert!(result.clean_stack);

        // assinatura corrompida falha
        let mut bad_tx = tx.clone();
        let mut bad_sig = signature.clone();
        bad_sig[4] ^= 0x40;
        bad_tx.inputs[0].signature_script =
            pay_to_pubkey_hash_unlock(&bad_sig, pair.public_key.as_bytes());
        let result = verify_spend(&bad_tx, 0, &pk_script, 0).unwrap();
        assert!(!result.valid);
    }

    #[test]
    fn test_p2pkh_spend_ecdsa() {
        checksig_round_trip(shared::SignatureAlgorithm::EcdsaSecp256k1);
    }

    #[test]
    fn test_p2pkh_spend_ed25519() {
        checksig_round_trip(shared::SignatureAlgorithm::Ed25519);
    }

    #[test]
    fn test_p2pkh_spend_schnorr() {
        checksig_round_trip(shared::SignatureAlgorithm::SchnorrSecp256k1);
    }

    #[test]
    fn test_checkmultisig_two_of_three() {
        let algorithm = shared::SignatureAlgorithm::Ed25519;
        let pairs: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate(algorithm).unwrap()).collect();

        let mut pk_script = ScriptBuilder::new().push_number(2);
        for pair in &pairs {
            pk_script = pk_script.push_data(pair.public_key.as_bytes());
        }
        let pk_script = pk_script
            .push_number(3)
            .push_opcode(OP_CHECKMULTISIG)
            .build();

        let mut tx = dummy_tx();
        let digest = tx.sig_hash(&pk_script, 0);
        let mut unlock = ScriptBuilder::new();
        for pair in [&pairs[0], &pairs[2]] {
            let mut signature = sign_hash(&pair.private_key, &digest).unwrap();
            signature.push(algorithm as u8);
            unlock = unlock.push_data(&signature);
        }
        tx.inputs[0].signature_script = unlock.build();

        let result = verify_spend(&tx, 0, &pk_script, 0).unwrap();
        assert!(result.valid);

        // assinaturas fora de ordem (chave 2 antes da 0) falham
        let mut out_of_order = ScriptBuilder::new();
        for pair in [&pairs[2], &pairs[0]] {
            let mut signature = sign_hash(&pair.private_key, &digest).unwrap();
            signature.push(algorithm as u8);
            out_of_order = out_of_order.push_data(&signature);
        }
        let mut bad_tx = dummy_tx();
        bad_tx.inputs[0].signature_script = out_of_order.build();
        let result = verify_spend(&bad_tx, 0, &pk_script, 0).unwrap();
        assert!(!result.valid);
    }

    #[test]
    fn test_unclean_stack_reported() {
        let mut tx = dummy_tx();
        tx.inputs[0].signature_script = ScriptBuilder::new()
            .push_number(1)
            .push_number(1)
            .build();
        let pk_script = Vec::new();
        let result = verify_spend(&tx, 0, &pk_script, 0).unwrap();
        assert!(result.valid);
        assert!(!result.clean_stack);
    }

    #[test]
    fn test_script_version_mismatch_is_error() {
        let tx = dummy_tx();
        assert_eq!(
            verify_spend(&tx, 0, &[OP_1], 1).unwrap_err(),
            ScriptError::UnsupportedVersion(1)
        );
    }

    #[test]
    fn test_sig_script_must_be_push_only() {
        let mut tx = dummy_tx();
        tx.inputs[0].signature_script = vec![OP_DUP];
        assert_eq!(
            verify_spend(&tx, 0, &[OP_1], 0).unwrap_err(),
            ScriptError::SigScriptNotPushOnly
        );
    }

    #[test]
    fn test_hash_opcodes() {
        let data = b"material";
        let script = ScriptBuilder::new()
            .push_data(data)
            .push_opcode(OP_BLAKE256)
            .push_data(Hash256::blake256(data).as_bytes())
            .push_opcode(OP_EQUAL)
            .build();
        let vm = run(&script).unwrap();
        assert!(as_bool(vm.stack.last().unwrap()));

        let script = ScriptBuilder::new()
            .push_data(data)
            .push_opcode(OP_HASH160)
            .push_data(&hash160(data))
            .push_opcode(OP_EQUAL)
            .build();
        let vm = run(&script).unwrap();
        assert!(as_bool(vm.stack.last().unwrap()));
    }

    #[test]
    fn test_within_and_comparisons() {
        let script = ScriptBuilder::new()
            .push_number(5)
            .push_number(1)
            .push_number(10)
            .push_opcode(OP_WITHIN)
            .build();
        let vm = run(&script).unwrap();
        assert!(as_bool(vm.stack.last().unwrap()));

        let script = ScriptBuilder::new()
            .push_number(3)
            .push_number(7)
            .push_opcode(OP_MIN)
            .push_number(3)
            .push_opcode(OP_NUMEQUAL)
            .build();
        let vm = run(&script).unwrap();
        assert!(as_bool(vm.stack.last().unwrap()));
    }

    #[test]
    fn test_altstack_round_trip() {
        let script = ScriptBuilder::new()
            .push_number(9)
            .push_opcode(OP_TOALTSTACK)
            .push_number(1)
            .push_opcode(OP_FROMALTSTACK)
            .build();
        let vm = run(&script).unwrap();
        assert_eq!(vm.stack.last().unwrap(), &encode_num(9));
    }
}
