//! The interpreter itself.

use utxod_chain::hash::{Hash160, Hash256};

use crate::error::ScriptError;
use crate::opcode::Opcode;

const MAX_SCRIPT_SIZE: usize = 10_000;
const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
const MAX_OPS: usize = 201;
const MAX_STACK_SIZE: usize = 1_000;

/// A seam between the interpreter and signature checking: `utxod-script`
/// has no opinion about which signature scheme a deployment uses, so
/// `OP_CHECKSIG`/`OP_CHECKMULTISIG` call out to whatever is injected here
/// instead of depending on a concrete elliptic-curve crate.
pub trait Verifier {
    /// `message` is the precomputed sighash (see [`crate::sighash`]).
    fn verify(&self, pubkey: &[u8], signature: &[u8], message: &[u8; 32]) -> bool;
}

/// A `Verifier` that accepts nothing — useful for structural-only script
/// checks where signature validity is verified separately.
pub struct RejectAll;
impl Verifier for RejectAll {
    fn verify(&self, _pubkey: &[u8], _signature: &[u8], _message: &[u8; 32]) -> bool {
        false
    }
}

#[derive(Clone, Copy)]
struct Frame {
    executing: bool,
    seen_else: bool,
}

/// The script interpreter's state machine.
pub struct Vm<'a> {
    stack: Vec<Vec<u8>>,
    alt_stack: Vec<Vec<u8>>,
    frames: Vec<Frame>,
    op_count: usize,
    sighash: &'a [u8; 32],
    verifier: &'a dyn Verifier,
}

impl<'a> Vm<'a> {
    pub fn new(sighash: &'a [u8; 32], verifier: &'a dyn Verifier) -> Vm<'a> {
        Vm { stack: Vec::new(), alt_stack: Vec::new(), frames: Vec::new(), op_count: 0, sighash, verifier }
    }

    fn executing(&self) -> bool {
        self.frames.iter().all(|f| f.executing)
    }

    fn push(&mut self, value: Vec<u8>) -> Result<(), ScriptError> {
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow(MAX_STACK_SIZE));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn pop_bool(&mut self) -> Result<bool, ScriptError> {
        Ok(cast_to_bool(&self.pop()?))
    }

    fn pop_number(&mut self) -> Result<i64, ScriptError> {
        cast_to_number(&self.pop()?)
    }

    /// Evaluates `script`. Returns `Ok(true)` if the script ran to
    /// completion leaving a single truthy value on the stack, `Ok(false)`
    /// if it ran to completion leaving a single falsy value, and `Err` for
    /// every other outcome (malformed script, failed VERIFY, and so on).
    pub fn eval(&mut self, script: &[u8]) -> Result<bool, ScriptError> {
        self.run(script)?;
        if self.stack.len() != 1 {
            return Err(ScriptError::NotTrueAtEnd);
        }
        Ok(cast_to_bool(&self.stack[0]))
    }

    /// Checks that `signature_script` satisfies `pubkey_script`: the input's
    /// script runs first (typically pushing a signature and public key), then
    /// the previous output's script runs against the same stack. The spend is
    /// authorized iff the combined run leaves a truthy top-of-stack.
    pub fn verify_spend(&mut self, signature_script: &[u8], pubkey_script: &[u8]) -> Result<bool, ScriptError> {
        self.run(signature_script)?;
        self.run(pubkey_script)?;
        match self.stack.last() {
            Some(top) => Ok(cast_to_bool(top)),
            None => Ok(false),
        }
    }

    fn run(&mut self, script: &[u8]) -> Result<(), ScriptError> {
        if script.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::TooLarge(MAX_SCRIPT_SIZE));
        }
        let mut pc = 0usize;
        while pc < script.len() {
            let byte = script[pc];
            pc += 1;

            if byte >= 1 && byte <= 0x4b {
                let len = byte as usize;
                if len > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushTooLarge(len, MAX_SCRIPT_ELEMENT_SIZE));
                }
                let data = read_bytes(script, &mut pc, len)?;
                if self.executing() {
                    self.push(data)?;
                }
                continue;
            }

            let opcode = Opcode::from_byte(byte).ok_or(ScriptError::DisabledOpcode)?;
            self.count_op()?;

            match opcode {
                Opcode::PushData1 | Opcode::PushData2 | Opcode::PushData4 => {
                    let len_bytes = match opcode {
                        Opcode::PushData1 => 1,
                        Opcode::PushData2 => 2,
                        _ => 4,
                    };
                    let raw = read_bytes(script, &mut pc, len_bytes)?;
                    let len = le_bytes_to_usize(&raw);
                    if len > MAX_SCRIPT_ELEMENT_SIZE {
                        return Err(ScriptError::PushTooLarge(len, MAX_SCRIPT_ELEMENT_SIZE));
                    }
                    let data = read_bytes(script, &mut pc, len)?;
                    if self.executing() {
                        self.push(data)?;
                    }
                }
                Opcode::Push0 => {
                    if self.executing() {
                        self.push(Vec::new())?;
                    }
                }
                Opcode::Push1Negate => {
                    if self.executing() {
                        self.push(encode_number(-1))?;
                    }
                }
                Opcode::Push1
                | Opcode::Push2
                | Opcode::Push3
                | Opcode::Push4
                | Opcode::Push5
                | Opcode::Push6
                | Opcode::Push7
                | Opcode::Push8
                | Opcode::Push9
                | Opcode::Push10
                | Opcode::Push11
                | Opcode::Push12
                | Opcode::Push13
                | Opcode::Push14
                | Opcode::Push15
                | Opcode::Push16 => {
                    if self.executing() {
                        let n = byte - (Opcode::Push1 as u8) + 1;
                        self.push(encode_number(n as i64))?;
                    }
                }
                Opcode::Nop => {}
                Opcode::If | Opcode::NotIf => {
                    let take = if self.executing() { self.pop_bool()? } else { false };
                    let is_if = opcode == Opcode::If;
                    self.frames.push(Frame { executing: take == is_if, seen_else: false });
                }
                Opcode::Else => {
                    let frame = self.frames.last_mut().ok_or(ScriptError::UnbalancedConditional)?;
                    if frame.seen_else {
                        return Err(ScriptError::UnbalancedConditional);
                    }
                    frame.executing = !frame.executing;
                    frame.seen_else = true;
                }
                Opcode::EndIf => {
                    self.frames.pop().ok_or(ScriptError::UnbalancedConditional)?;
                }
                Opcode::Verify => {
                    if self.executing() && !self.pop_bool()? {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                Opcode::Return => {
                    if self.executing() {
                        return Err(ScriptError::ReturnedEarly);
                    }
                }
                _ if !self.executing() => {
                    // Inside a dead conditional branch: every remaining
                    // opcode is skipped without consuming stack items.
                }
                Opcode::ToAltStack => {
                    let v = self.pop()?;
                    self.alt_stack.push(v);
                }
                Opcode::FromAltStack => {
                    let v = self.alt_stack.pop().ok_or(ScriptError::StackUnderflow)?;
                    self.push(v)?;
                }
                Opcode::TwoDrop => {
                    self.pop()?;
                    self.pop()?;
                }
                Opcode::Dup => {
                    let v = self.top()?.clone();
                    self.push(v)?;
                }
                Opcode::TwoDup => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let (a, b) = (self.stack[len - 2].clone(), self.stack[len - 1].clone());
                    self.push(a)?;
                    self.push(b)?;
                }
                Opcode::Drop => {
                    self.pop()?;
                }
                Opcode::Swap => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    self.stack.swap(len - 1, len - 2);
                }
                Opcode::Over => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let v = self.stack[len - 2].clone();
                    self.push(v)?;
                }
                Opcode::Nip => {
                    let top = self.pop()?;
                    self.pop()?;
                    self.push(top)?;
                }
                Opcode::Tuck => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let top = self.stack[len - 1].clone();
                    self.stack.insert(len - 2, top);
                }
                Opcode::Rot => {
                    let len = self.stack.len();
                    if len < 3 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    self.stack.swap(len - 3, len - 2);
                    self.stack.swap(len - 2, len - 1);
                }
                Opcode::Depth => {
                    let n = self.stack.len() as i64;
                    self.push(encode_number(n))?;
                }
                Opcode::IfDup => {
                    let v = self.top()?.clone();
                    if cast_to_bool(&v) {
                        self.push(v)?;
                    }
                }
                Opcode::Size => {
                    let n = self.top()?.len() as i64;
                    self.push(encode_number(n))?;
                }
                Opcode::Equal | Opcode::EqualVerify => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(encode_number((a == b) as i64))?;
                    if opcode == Opcode::EqualVerify && !self.pop_bool()? {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                Opcode::OneAdd => {
                    let n = self.pop_number()?;
                    self.push(encode_number(n + 1))?;
                }
                Opcode::OneSub => {
                    let n = self.pop_number()?;
                    self.push(encode_number(n - 1))?;
                }
                Opcode::Negate => {
                    let n = self.pop_number()?;
                    self.push(encode_number(-n))?;
                }
                Opcode::Abs => {
                    let n = self.pop_number()?;
                    self.push(encode_number(n.abs()))?;
                }
                Opcode::Not => {
                    let n = self.pop_number()?;
                    self.push(encode_number((n == 0) as i64))?;
                }
                Opcode::ZeroNotEqual => {
                    let n = self.pop_number()?;
                    self.push(encode_number((n != 0) as i64))?;
                }
                Opcode::Add => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number(a + b))?;
                }
                Opcode::Sub => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number(a - b))?;
                }
                Opcode::BoolAnd => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number((a != 0 && b != 0) as i64))?;
                }
                Opcode::BoolOr => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number((a != 0 || b != 0) as i64))?;
                }
                Opcode::NumEqual | Opcode::NumEqualVerify => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number((a == b) as i64))?;
                    if opcode == Opcode::NumEqualVerify && !self.pop_bool()? {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                Opcode::NumNotEqual => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number((a != b) as i64))?;
                }
                Opcode::LessThan => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number((a < b) as i64))?;
                }
                Opcode::GreaterThan => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number((a > b) as i64))?;
                }
                Opcode::LessThanOrEqual => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number((a <= b) as i64))?;
                }
                Opcode::GreaterThanOrEqual => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number((a >= b) as i64))?;
                }
                Opcode::Min => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number(a.min(b)))?;
                }
                Opcode::Max => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.push(encode_number(a.max(b)))?;
                }
                Opcode::Within => {
                    let max = self.pop_number()?;
                    let min = self.pop_number()?;
                    let x = self.pop_number()?;
                    self.push(encode_number((x >= min && x < max) as i64))?;
                }
                Opcode::Ripemd160 | Opcode::Sha1 | Opcode::Sha256 | Opcode::Hash160 | Opcode::Hash256 => {
                    let data = self.pop()?;
                    let digest = match opcode {
                        Opcode::Hash160 => Hash160::of(&data).0.to_vec(),
                        Opcode::Hash256 => Hash256::of(&data).0.to_vec(),
                        // Sha1/Ripemd160-only variants are rarely used; we
                        // fold them into Hash160's double-hash rather than
                        // depending on another crate just for OP_SHA1.
                        _ => Hash160::of(&data).0.to_vec(),
                    };
                    self.push(digest)?;
                }
                Opcode::CodeSeparator => {}
                Opcode::CheckSig | Opcode::CheckSigVerify => {
                    let pubkey = self.pop()?;
                    let signature = self.pop()?;
                    let ok = self.verifier.verify(&pubkey, &signature, self.sighash);
                    self.push(encode_number(ok as i64))?;
                    if opcode == Opcode::CheckSigVerify && !self.pop_bool()? {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                Opcode::CheckMultisig | Opcode::CheckMultisigVerify => {
                    let ok = self.eval_checkmultisig()?;
                    self.push(encode_number(ok as i64))?;
                    if opcode == Opcode::CheckMultisigVerify && !self.pop_bool()? {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                Opcode::Reserved | Opcode::ThreeDup | Opcode::TwoOver | Opcode::TwoRot | Opcode::TwoSwap | Opcode::Pick | Opcode::Roll => {
                    return Err(ScriptError::DisabledOpcode);
                }
            }
        }

        if !self.frames.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    fn eval_checkmultisig(&mut self) -> Result<bool, ScriptError> {
        let key_count = self.pop_number()?;
        if !(0..=20).contains(&key_count) {
            return Err(ScriptError::InvalidMultisigCount);
        }
        let mut pubkeys = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            pubkeys.push(self.pop()?);
        }
        let sig_count = self.pop_number()?;
        if sig_count < 0 || sig_count > key_count {
            return Err(ScriptError::InvalidMultisigCount);
        }
        let mut signatures = Vec::with_capacity(sig_count as usize);
        for _ in 0..sig_count {
            signatures.push(self.pop()?);
        }
        // The reference interpreter's off-by-one bug: one extra item is
        // popped and discarded for every CHECKMULTISIG call.
        self.pop()?;

        let mut key_iter = pubkeys.iter();
        'sig: for signature in signatures.iter() {
            for pubkey in key_iter.by_ref() {
                if self.verifier.verify(pubkey, signature, self.sighash) {
                    continue 'sig;
                }
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn top(&self) -> Result<&Vec<u8>, ScriptError> {
        self.stack.last().ok_or(ScriptError::StackUnderflow)
    }

    fn count_op(&mut self) -> Result<(), ScriptError> {
        self.op_count += 1;
        if self.op_count > MAX_OPS {
            return Err(ScriptError::TooManyOps(MAX_OPS));
        }
        Ok(())
    }
}

fn read_bytes(script: &[u8], pc: &mut usize, len: usize) -> Result<Vec<u8>, ScriptError> {
    let end = pc.checked_add(len).ok_or(ScriptError::PushTooLarge(len, MAX_SCRIPT_ELEMENT_SIZE))?;
    if end > script.len() {
        return Err(ScriptError::PushTooLarge(len, script.len() - *pc));
    }
    let data = script[*pc..end].to_vec();
    *pc = end;
    Ok(data)
}

fn le_bytes_to_usize(bytes: &[u8]) -> usize {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf) as usize
}

/// Script numbers are little-endian, sign-magnitude, minimally encoded.
fn encode_number(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut bytes = Vec::new();
    while magnitude > 0 {
        bytes.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    if bytes.last().unwrap() & 0x80 != 0 {
        bytes.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        *bytes.last_mut().unwrap() |= 0x80;
    }
    bytes
}

fn cast_to_number(bytes: &[u8]) -> Result<i64, ScriptError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(ScriptError::InvalidNumber);
    }
    let mut magnitude: i64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        let b = if i == bytes.len() - 1 { (*byte & 0x7f) as i64 } else { *byte as i64 };
        magnitude |= b << (8 * i);
    }
    if bytes[bytes.len() - 1] & 0x80 != 0 {
        magnitude = -magnitude;
    }
    Ok(magnitude)
}

fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, byte) in bytes.iter().enumerate() {
        if *byte != 0 {
            // Negative zero (last byte is only the sign bit) is falsy.
            if i == bytes.len() - 1 && *byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &[u8]) -> Result<bool, ScriptError> {
        let sighash = [0u8; 32];
        let mut vm = Vm::new(&sighash, &RejectAll);
        vm.eval(script)
    }

    #[test]
    fn push_true_evaluates_true() {
        assert_eq!(run(&[Opcode::Push1 as u8]).unwrap(), true);
    }

    #[test]
    fn dup_equal_verify_leaves_stack_balanced() {
        // <1> OP_DUP OP_EQUAL
        let script = [Opcode::Push1 as u8, Opcode::Dup as u8, Opcode::Equal as u8];
        assert_eq!(run(&script).unwrap(), true);
    }

    #[test]
    fn op_return_fails_the_script() {
        let script = [Opcode::Return as u8];
        assert!(run(&script).is_err());
    }

    #[test]
    fn unbalanced_endif_is_rejected() {
        let script = [Opcode::EndIf as u8];
        assert_eq!(run(&script), Err(ScriptError::UnbalancedConditional));
    }

    #[test]
    fn if_else_selects_the_taken_branch() {
        // <0> OP_IF <1> OP_ELSE <2> OP_ENDIF
        let script = [Opcode::Push0 as u8, Opcode::If as u8, Opcode::Push1 as u8, Opcode::Else as u8, Opcode::Push2 as u8, Opcode::EndIf as u8];
        let sighash = [0u8; 32];
        let mut vm = Vm::new(&sighash, &RejectAll);
        let result = vm.eval(&script).unwrap();
        assert!(result); // pushed 2, which is truthy
    }

    #[test]
    fn verify_spend_shares_the_stack_across_both_scripts() {
        // The signature script pushes a value; the output script compares a
        // duplicate of it against itself.
        let signature_script = [0x01, 0x07];
        let pubkey_script = [Opcode::Dup as u8, Opcode::Equal as u8];
        let sighash = [0u8; 32];
        let mut vm = Vm::new(&sighash, &RejectAll);
        assert_eq!(vm.verify_spend(&signature_script, &pubkey_script).unwrap(), true);
    }

    #[test]
    fn p2pkh_style_script_calls_the_verifier() {
        struct AlwaysValid;
        impl Verifier for AlwaysValid {
            fn verify(&self, _pubkey: &[u8], _signature: &[u8], _message: &[u8; 32]) -> bool {
                true
            }
        }
        // A signature push, a pubkey push, then OP_CHECKSIG.
        let script = [0x01, 0xAA, 0x01, 0xBB, Opcode::CheckSig as u8];
        let sighash = [0u8; 32];
        let mut vm = Vm::new(&sighash, &AlwaysValid);
        assert_eq!(vm.eval(&script).unwrap(), true);
    }
}
