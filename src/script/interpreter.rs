//! Script execution
//!
//! A stack machine with the consensus-visible limits: 520-byte
//! elements, 1,000 combined stack entries, 201 counted operations,
//! 4-byte arithmetic operands. Signature opcodes splice the current
//! program into a "connected script" and defer hashing to the
//! transaction through [`SignatureHash`].

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::collections::VecDeque;

use crate::crypto;
use crate::error::ScriptError;
use crate::script::num;
use crate::script::opcodes::{self, *};
use crate::script::Script;

/// Upper bound on a program handed to [`correctly_spends`].
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Upper bound on one pushed stack element.
pub const MAX_ELEMENT_SIZE: usize = 520;
/// Upper bound on main plus alt stack entries.
pub const MAX_STACK_SIZE: usize = 1_000;
/// Upper bound on counted operations per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;
/// Upper bound on keys in one CHECKMULTISIG.
pub const MAX_MULTISIG_KEYS: i64 = 20;

/// The two capabilities the interpreter needs from the transaction
/// whose input is being verified.
pub trait SignatureHash {
    /// Hash committed to by a signature over `input_index`, given the
    /// connected script and the signature's sighash byte.
    fn signature_hash(
        &self,
        input_index: usize,
        connected_script: &[u8],
        sighash_flags: u8,
    ) -> [u8; 32];
}

/// The interpreter's element stack.
///
/// A contiguous sequence with push/pop at the top plus indexed access
/// counted from the top, which OP_PICK and OP_ROLL need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack {
    items: Vec<Vec<u8>>,
}

impl Stack {
    pub fn new() -> Self {
        Stack { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: Vec<u8>) {
        self.items.push(item);
    }

    pub fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.items.pop().ok_or(ScriptError::StackUnderflow)
    }

    /// The top element.
    pub fn peek(&self) -> Result<&[u8], ScriptError> {
        self.peek_at(0)
    }

    /// The element `depth` entries below the top.
    pub fn peek_at(&self, depth: usize) -> Result<&[u8], ScriptError> {
        if depth >= self.items.len() {
            return Err(ScriptError::StackUnderflow);
        }
        Ok(&self.items[self.items.len() - 1 - depth])
    }

    /// Remove and return the element `depth` entries below the top.
    pub fn remove_at(&mut self, depth: usize) -> Result<Vec<u8>, ScriptError> {
        if depth >= self.items.len() {
            return Err(ScriptError::StackUnderflow);
        }
        let index = self.items.len() - 1 - depth;
        Ok(self.items.remove(index))
    }

    pub fn as_slice(&self) -> &[Vec<u8>] {
        &self.items
    }
}

/// One level of the conditional stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    /// Condition held; the arm executes.
    Taken,
    /// Condition failed; skipping until OP_ELSE or OP_ENDIF.
    NotTaken,
    /// Opened inside a branch that is itself not executing. Never
    /// executes, and OP_ELSE must not wake it up.
    Skipped,
}

/// Verify that `script_sig` satisfies `script_pubkey` for the given
/// input of `tx`.
///
/// Runs the input script, then the output script over the surviving
/// stack, and requires a true top element. With `enforce_p2sh`, a
/// pay-to-script-hash output additionally requires a push-only input
/// script whose top push parses and satisfies as the real program.
pub fn correctly_spends<T: SignatureHash + ?Sized>(
    tx: &T,
    input_index: usize,
    script_sig: &Script,
    script_pubkey: &Script,
    enforce_p2sh: bool,
) -> Result<(), ScriptError> {
    if script_sig.len() > MAX_SCRIPT_SIZE || script_pubkey.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::OversizedProgram);
    }

    let mut stack = Stack::new();
    execute(tx, input_index, script_sig, &mut stack)?;
    let mut p2sh_stack = if enforce_p2sh { Some(stack.clone()) } else { None };
    execute(tx, input_index, script_pubkey, &mut stack)?;

    if !num::cast_to_bool(stack.peek().map_err(|_| ScriptError::FalseStack)?) {
        return Err(ScriptError::FalseStack);
    }

    if enforce_p2sh && script_pubkey.is_pay_to_script_hash() {
        for chunk in script_sig.chunks() {
            if !chunk.is_push() && chunk.opcode > OP_16 {
                return Err(ScriptError::NonPushScriptSig);
            }
        }
        let stack = p2sh_stack.as_mut().expect("snapshot exists when enforcing");
        let serialized = stack.pop()?;
        let inner = Script::new(serialized)?;
        execute(tx, input_index, &inner, stack)?;
        if !num::cast_to_bool(stack.peek().map_err(|_| ScriptError::FalseStack)?) {
            return Err(ScriptError::FalseStack);
        }
    }

    Ok(())
}

/// Execute one script against `stack`.
pub fn execute<T: SignatureHash + ?Sized>(
    tx: &T,
    input_index: usize,
    script: &Script,
    stack: &mut Stack,
) -> Result<(), ScriptError> {
    let mut alt_stack = Stack::new();
    let mut cond_stack: Vec<Branch> = Vec::new();
    let mut op_count = 0usize;
    let mut last_code_sep = 0usize;

    for chunk in script.chunks() {
        let executing = cond_stack.iter().all(|b| *b == Branch::Taken);

        if let Some(data) = &chunk.data {
            if data.len() > MAX_ELEMENT_SIZE {
                return Err(ScriptError::OversizedElement);
            }
            if executing {
                stack.push(data.clone());
            }
        } else {
            let op = chunk.opcode;

            if op > OP_16 {
                op_count += 1;
                if op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ScriptError::OpCountExceeded);
                }
            }

            if opcodes::is_disabled(op) {
                return Err(ScriptError::DisabledOpcode(opcodes::name(op)));
            }
            if op == OP_VERIF || op == OP_VERNOTIF {
                return Err(ScriptError::ReservedOpcode(op));
            }

            match op {
                // Flow control runs whether or not the current branch
                // executes, so nesting stays balanced.
                OP_IF | OP_NOTIF => {
                    if executing {
                        let value = num::cast_to_bool(&stack.pop()?);
                        let taken = if op == OP_NOTIF { !value } else { value };
                        cond_stack.push(if taken { Branch::Taken } else { Branch::NotTaken });
                    } else {
                        cond_stack.push(Branch::Skipped);
                    }
                }
                OP_ELSE => match cond_stack.last_mut() {
                    Some(branch) => {
                        *branch = match *branch {
                            Branch::Taken => Branch::NotTaken,
                            Branch::NotTaken => Branch::Taken,
                            Branch::Skipped => Branch::Skipped,
                        };
                    }
                    None => return Err(ScriptError::UnmatchedElse),
                },
                OP_ENDIF => {
                    cond_stack.pop().ok_or(ScriptError::UnmatchedEndif)?;
                }

                _ if !executing => {}

                OP_0 => stack.push(Vec::new()),
                OP_1NEGATE => stack.push(num::encode_i64(-1)),
                OP_1..=OP_16 => stack.push(num::encode_i64((op - OP_1 + 1) as i64)),
                OP_NOP | OP_NOP1..=OP_NOP10 => {}

                OP_VERIFY => {
                    if !num::cast_to_bool(&stack.pop()?) {
                        return Err(ScriptError::VerifyFailed("OP_VERIFY"));
                    }
                }
                OP_RETURN => return Err(ScriptError::OpReturn),

                OP_TOALTSTACK => alt_stack.push(stack.pop()?),
                OP_FROMALTSTACK => stack.push(alt_stack.pop()?),
                OP_2DROP => {
                    stack.pop()?;
                    stack.pop()?;
                }
                OP_2DUP => {
                    let a = stack.peek_at(1)?.to_vec();
                    let b = stack.peek_at(0)?.to_vec();
                    stack.push(a);
                    stack.push(b);
                }
                OP_3DUP => {
                    let a = stack.peek_at(2)?.to_vec();
                    let b = stack.peek_at(1)?.to_vec();
                    let c = stack.peek_at(0)?.to_vec();
                    stack.push(a);
                    stack.push(b);
                    stack.push(c);
                }
                OP_2OVER => {
                    let a = stack.peek_at(3)?.to_vec();
                    let b = stack.peek_at(2)?.to_vec();
                    stack.push(a);
                    stack.push(b);
                }
                OP_2ROT => {
                    let x1 = stack.remove_at(5)?;
                    let x2 = stack.remove_at(4)?;
                    stack.push(x1);
                    stack.push(x2);
                }
                OP_2SWAP => {
                    let x1 = stack.remove_at(3)?;
                    let x2 = stack.remove_at(2)?;
                    stack.push(x1);
                    stack.push(x2);
                }
                OP_IFDUP => {
                    if num::cast_to_bool(stack.peek()?) {
                        let top = stack.peek()?.to_vec();
                        stack.push(top);
                    }
                }
                OP_DEPTH => {
                    let depth = stack.len() as i64;
                    stack.push(num::encode_i64(depth));
                }
                OP_DROP => {
                    stack.pop()?;
                }
                OP_DUP => {
                    let top = stack.peek()?.to_vec();
                    stack.push(top);
                }
                OP_NIP => {
                    stack.remove_at(1)?;
                }
                OP_OVER => {
                    let second = stack.peek_at(1)?.to_vec();
                    stack.push(second);
                }
                OP_PICK | OP_ROLL => {
                    let depth = pop_index(stack)?;
                    if op == OP_PICK {
                        let item = stack.peek_at(depth)?.to_vec();
                        stack.push(item);
                    } else {
                        let item = stack.remove_at(depth)?;
                        stack.push(item);
                    }
                }
                OP_ROT => {
                    let third = stack.remove_at(2)?;
                    stack.push(third);
                }
                OP_SWAP => {
                    let second = stack.remove_at(1)?;
                    stack.push(second);
                }
                OP_TUCK => {
                    let x2 = stack.pop()?;
                    let x1 = stack.pop()?;
                    stack.push(x2.clone());
                    stack.push(x1);
                    stack.push(x2);
                }
                OP_SIZE => {
                    let size = stack.peek()?.len() as i64;
                    stack.push(num::encode_i64(size));
                }

                OP_EQUAL | OP_EQUALVERIFY => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    let equal = a == b;
                    if op == OP_EQUAL {
                        push_bool(stack, equal);
                    } else if !equal {
                        return Err(ScriptError::VerifyFailed("OP_EQUALVERIFY"));
                    }
                }

                OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                    let n = pop_num(stack)?;
                    let result = match op {
                        OP_1ADD => n + 1,
                        OP_1SUB => n - 1,
                        OP_NEGATE => -n,
                        OP_ABS => n.abs(),
                        OP_NOT => BigInt::from(n.is_zero() as u8),
                        _ => BigInt::from(!n.is_zero() as u8),
                    };
                    stack.push(num::encode(&result));
                }

                OP_ADD | OP_SUB | OP_MIN | OP_MAX => {
                    let b = pop_num(stack)?;
                    let a = pop_num(stack)?;
                    let result = match op {
                        OP_ADD => a + b,
                        OP_SUB => a - b,
                        OP_MIN => a.min(b),
                        _ => a.max(b),
                    };
                    stack.push(num::encode(&result));
                }

                OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMNOTEQUAL | OP_LESSTHAN
                | OP_GREATERTHAN | OP_LESSTHANOREQUAL | OP_GREATERTHANOREQUAL => {
                    let b = pop_num(stack)?;
                    let a = pop_num(stack)?;
                    let result = match op {
                        OP_BOOLAND => !a.is_zero() && !b.is_zero(),
                        OP_BOOLOR => !a.is_zero() || !b.is_zero(),
                        OP_NUMEQUAL => a == b,
                        OP_NUMNOTEQUAL => a != b,
                        OP_LESSTHAN => a < b,
                        OP_GREATERTHAN => a > b,
                        OP_LESSTHANOREQUAL => a <= b,
                        _ => a >= b,
                    };
                    push_bool(stack, result);
                }
                OP_NUMEQUALVERIFY => {
                    let b = pop_num(stack)?;
                    let a = pop_num(stack)?;
                    if a != b {
                        return Err(ScriptError::VerifyFailed("OP_NUMEQUALVERIFY"));
                    }
                }
                OP_WITHIN => {
                    let max = pop_num(stack)?;
                    let min = pop_num(stack)?;
                    let x = pop_num(stack)?;
                    push_bool(stack, min <= x && x < max);
                }

                OP_RIPEMD160 => {
                    let data = stack.pop()?;
                    stack.push(crypto::ripemd160(&data).to_vec());
                }
                OP_SHA1 => {
                    let data = stack.pop()?;
                    let mut hasher = sha1_smol::Sha1::new();
                    hasher.update(&data);
                    stack.push(hasher.digest().bytes().to_vec());
                }
                OP_SHA256 => {
                    let data = stack.pop()?;
                    stack.push(crypto::sha256(&data).to_vec());
                }
                OP_HASH160 => {
                    let data = stack.pop()?;
                    stack.push(crypto::hash160(&data).to_vec());
                }
                OP_HASH256 => {
                    let data = stack.pop()?;
                    stack.push(crypto::sha256d(&data).to_vec());
                }

                OP_CODESEPARATOR => {
                    last_code_sep = chunk.offset + 1;
                }

                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    let pubkey = stack.pop()?;
                    let sig = stack.pop()?;

                    let mut pattern = Vec::new();
                    Script::push_data(&mut pattern, &sig);
                    let connected =
                        Script::remove_all_instances(&script.program()[last_code_sep..], &pattern);

                    let success = check_signature(tx, input_index, &connected, &sig, &pubkey);
                    if op == OP_CHECKSIG {
                        push_bool(stack, success);
                    } else if !success {
                        return Err(ScriptError::VerifyFailed("OP_CHECKSIGVERIFY"));
                    }
                }

                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let key_count = pop_num(stack)?
                        .to_i64()
                        .ok_or(ScriptError::InvalidMultisigCount)?;
                    if !(0..=MAX_MULTISIG_KEYS).contains(&key_count) {
                        return Err(ScriptError::InvalidMultisigCount);
                    }
                    op_count += key_count as usize;
                    if op_count > MAX_OPS_PER_SCRIPT {
                        return Err(ScriptError::OpCountExceeded);
                    }
                    let mut keys = VecDeque::with_capacity(key_count as usize);
                    for _ in 0..key_count {
                        keys.push_back(stack.pop()?);
                    }

                    let sig_count = pop_num(stack)?
                        .to_i64()
                        .ok_or(ScriptError::InvalidMultisigCount)?;
                    if !(0..=key_count).contains(&sig_count) {
                        return Err(ScriptError::InvalidMultisigCount);
                    }
                    let mut sigs = VecDeque::with_capacity(sig_count as usize);
                    for _ in 0..sig_count {
                        sigs.push_back(stack.pop()?);
                    }

                    let mut connected = script.program()[last_code_sep..].to_vec();
                    for sig in &sigs {
                        let mut pattern = Vec::new();
                        Script::push_data(&mut pattern, sig);
                        connected = Script::remove_all_instances(&connected, &pattern);
                    }

                    // Signatures must follow key order: each key is
                    // consumed once, each signature only by a matching
                    // key, and running out of keys first is failure.
                    let mut valid = true;
                    while let Some(sig) = sigs.front().cloned() {
                        let Some(pubkey) = keys.pop_front() else {
                            valid = false;
                            break;
                        };
                        if check_signature(tx, input_index, &connected, &sig, &pubkey) {
                            sigs.pop_front();
                        }
                        if sigs.len() > keys.len() {
                            valid = false;
                            break;
                        }
                    }

                    // The reference implementation pops one element too
                    // many here; consensus requires doing the same.
                    stack.pop()?;

                    if op == OP_CHECKMULTISIG {
                        push_bool(stack, valid);
                    } else if !valid {
                        return Err(ScriptError::VerifyFailed("OP_CHECKMULTISIGVERIFY"));
                    }
                }

                other => return Err(ScriptError::ReservedOpcode(other)),
            }
        }

        if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
    }

    if !cond_stack.is_empty() {
        return Err(ScriptError::UnterminatedConditional);
    }
    Ok(())
}

fn push_bool(stack: &mut Stack, value: bool) {
    stack.push(if value { vec![1] } else { Vec::new() });
}

/// Pop an arithmetic operand, enforcing the 4-byte limit.
fn pop_num(stack: &mut Stack) -> Result<BigInt, ScriptError> {
    let data = stack.pop()?;
    if data.len() > 4 {
        return Err(ScriptError::IntegerOverflow);
    }
    Ok(num::decode(&data))
}

/// Pop a stack index for OP_PICK/OP_ROLL and range-check it.
fn pop_index(stack: &mut Stack) -> Result<usize, ScriptError> {
    let n = pop_num(stack)?.to_i64().ok_or(ScriptError::StackUnderflow)?;
    if n < 0 || n as usize >= stack.len() {
        return Err(ScriptError::StackUnderflow);
    }
    Ok(n as usize)
}

/// Verify one signature. The sighash byte rides as the signature's last
/// byte; anything malformed verifies false rather than aborting.
fn check_signature<T: SignatureHash + ?Sized>(
    tx: &T,
    input_index: usize,
    connected_script: &[u8],
    sig: &[u8],
    pubkey: &[u8],
) -> bool {
    let Some((sighash_flags, der)) = sig.split_last() else {
        return false;
    };
    let hash = tx.signature_hash(input_index, connected_script, *sighash_flags);
    crypto::ecdsa_verify(&hash, der, pubkey)
}
