//! Recognizing the common output script shapes, mirroring the reference
//! implementation's `txnouttype`/`Solver` classification.

use utxod_chain::hash::{Hash160, Hash256};
use utxod_chain::transparent::Script;

use crate::opcode::Opcode;

/// The recognized shape of an output script. `NonStandard` covers anything
/// this node can still store and relay but declines to classify further.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Template {
    /// `<pubkey> OP_CHECKSIG`
    Pubkey(Vec<u8>),
    /// `OP_DUP OP_HASH160 <hash160> OP_EQUALVERIFY OP_CHECKSIG`
    PubkeyHash(Hash160),
    /// `OP_HASH160 <hash160> OP_EQUAL`
    ScriptHash(Hash160),
    /// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`
    Multisig { required: u8, pubkeys: Vec<Vec<u8>> },
    /// `OP_RETURN <data>`: provably unspendable, used to embed data.
    NullData(Vec<u8>),
    NonStandard,
}

impl Template {
    pub fn match_script(script: &Script) -> Template {
        let bytes = script.as_bytes();
        match_pubkey(bytes)
            .or_else(|| match_pubkey_hash(bytes))
            .or_else(|| match_script_hash(bytes))
            .or_else(|| match_multisig(bytes))
            .or_else(|| match_null_data(bytes))
            .unwrap_or(Template::NonStandard)
    }

    /// The `Hash160` an address-indexed store should key this output under,
    /// if it has one.
    pub fn address_hash(&self) -> Option<Hash160> {
        match self {
            Template::Pubkey(pubkey) => Some(Hash160::of(pubkey)),
            Template::PubkeyHash(hash) | Template::ScriptHash(hash) => Some(*hash),
            _ => None,
        }
    }
}

fn read_push(bytes: &[u8], pc: usize) -> Option<(&[u8], usize)> {
    let op = *bytes.get(pc)?;
    let (len, header) = match op {
        0x01..=0x4b => (op as usize, 1),
        _ if op == Opcode::PushData1 as u8 => (*bytes.get(pc + 1)? as usize, 2),
        _ if op == Opcode::PushData2 as u8 => {
            let lo = *bytes.get(pc + 1)? as usize;
            let hi = *bytes.get(pc + 2)? as usize;
            (lo | (hi << 8), 3)
        }
        _ => return None,
    };
    let start = pc + header;
    let end = start.checked_add(len)?;
    bytes.get(start..end).map(|data| (data, end))
}

fn match_pubkey(bytes: &[u8]) -> Option<Template> {
    let (pubkey, pc) = read_push(bytes, 0)?;
    if matches!(pubkey.len(), 33 | 65) && bytes.get(pc) == Some(&(Opcode::CheckSig as u8)) && pc + 1 == bytes.len() {
        Some(Template::Pubkey(pubkey.to_vec()))
    } else {
        None
    }
}

fn match_pubkey_hash(bytes: &[u8]) -> Option<Template> {
    if bytes.len() != 25 {
        return None;
    }
    if bytes[0] != Opcode::Dup as u8 || bytes[1] != Opcode::Hash160 as u8 || bytes[2] != 0x14 {
        return None;
    }
    if bytes[23] != Opcode::EqualVerify as u8 || bytes[24] != Opcode::CheckSig as u8 {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&bytes[3..23]);
    Some(Template::PubkeyHash(Hash160(hash)))
}

fn match_script_hash(bytes: &[u8]) -> Option<Template> {
    if bytes.len() != 23 {
        return None;
    }
    if bytes[0] != Opcode::Hash160 as u8 || bytes[1] != 0x14 || bytes[22] != Opcode::Equal as u8 {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&bytes[2..22]);
    Some(Template::ScriptHash(Hash160(hash)))
}

fn op_n(byte: u8) -> Option<u8> {
    match byte {
        b if b == Opcode::Push0 as u8 => Some(0),
        b if (Opcode::Push1 as u8..=Opcode::Push16 as u8).contains(&b) => Some(b - Opcode::Push1 as u8 + 1),
        _ => None,
    }
}

fn match_multisig(bytes: &[u8]) -> Option<Template> {
    if bytes.is_empty() {
        return None;
    }
    let required = op_n(bytes[0])?;
    let mut pc = 1;
    let mut pubkeys = Vec::new();
    while let Some((pubkey, next)) = read_push(bytes, pc) {
        if !matches!(pubkey.len(), 33 | 65) {
            break;
        }
        pubkeys.push(pubkey.to_vec());
        pc = next;
    }
    if pubkeys.is_empty() {
        return None;
    }
    let declared_count = op_n(*bytes.get(pc)?)?;
    if declared_count as usize != pubkeys.len() {
        return None;
    }
    pc += 1;
    if bytes.get(pc) != Some(&(Opcode::CheckMultisig as u8)) || pc + 1 != bytes.len() {
        return None;
    }
    if required == 0 || required as usize > pubkeys.len() {
        return None;
    }
    Some(Template::Multisig { required, pubkeys })
}

fn match_null_data(bytes: &[u8]) -> Option<Template> {
    if bytes.first() != Some(&(Opcode::Return as u8)) {
        return None;
    }
    Some(Template::NullData(bytes[1..].to_vec()))
}

/// Counts signature operations in a script: `OP_CHECKSIG(VERIFY)` each
/// count 1, `OP_CHECKMULTISIG(VERIFY)` each count 20 (the worst-case key
/// count), pushes are skipped. Unparseable trailing bytes end the count
/// early rather than failing — the block-level cap only needs an upper
/// bound on verification cost, not a full parse.
pub fn sigop_count(bytes: &[u8]) -> usize {
    let mut count = 0;
    let mut pc = 0;
    while pc < bytes.len() {
        if let Some((_, next)) = read_push(bytes, pc) {
            pc = next;
            continue;
        }
        let op = bytes[pc];
        if op == Opcode::CheckSig as u8 || op == Opcode::CheckSigVerify as u8 {
            count += 1;
        } else if op == Opcode::CheckMultisig as u8 || op == Opcode::CheckMultisigVerify as u8 {
            count += 20;
        } else if op == Opcode::PushData4 as u8 {
            // read_push only handles the 1- and 2-byte length forms.
            let len = bytes.get(pc + 1..pc + 5).map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize);
            match len {
                Some(len) if pc + 5 + len <= bytes.len() => {
                    pc += 5 + len;
                    continue;
                }
                _ => break,
            }
        }
        pc += 1;
    }
    count
}

/// Hashes a redeem script the way `OP_HASH160` would, for matching a
/// `ScriptHash` template's claimed hash against a candidate redeem script
/// supplied in a spending input's scriptSig.
pub fn hash_redeem_script(redeem_script: &[u8]) -> Hash160 {
    Hash160::of(redeem_script)
}

/// Double-SHA256 of a script, used nowhere in the `txnouttype` templates
/// themselves but exposed for callers that need the stronger digest (e.g.
/// logging a script's identity without printing it in full).
pub fn strong_hash(script: &Script) -> Hash256 {
    Hash256::of(script.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_pubkey_hash() {
        let mut bytes = vec![Opcode::Dup as u8, Opcode::Hash160 as u8, 0x14];
        bytes.extend_from_slice(&[0xAB; 20]);
        bytes.push(Opcode::EqualVerify as u8);
        bytes.push(Opcode::CheckSig as u8);
        let script = Script(bytes);
        assert!(matches!(Template::match_script(&script), Template::PubkeyHash(_)));
    }

    #[test]
    fn recognizes_script_hash() {
        let mut bytes = vec![Opcode::Hash160 as u8, 0x14];
        bytes.extend_from_slice(&[0xCD; 20]);
        bytes.push(Opcode::Equal as u8);
        let script = Script(bytes);
        assert!(matches!(Template::match_script(&script), Template::ScriptHash(_)));
    }

    #[test]
    fn recognizes_null_data() {
        let script = Script(vec![Opcode::Return as u8, 1, 2, 3]);
        assert!(matches!(Template::match_script(&script), Template::NullData(_)));
    }

    #[test]
    fn unrecognized_script_is_non_standard() {
        let script = Script(vec![Opcode::Nop as u8]);
        assert_eq!(Template::match_script(&script), Template::NonStandard);
    }

    #[test]
    fn sigop_count_weighs_multisig_at_worst_case() {
        let mut bytes = vec![Opcode::Dup as u8, Opcode::Hash160 as u8, 0x14];
        bytes.extend_from_slice(&[0xAB; 20]);
        bytes.push(Opcode::EqualVerify as u8);
        bytes.push(Opcode::CheckSig as u8);
        assert_eq!(sigop_count(&bytes), 1);
        assert_eq!(sigop_count(&[Opcode::CheckMultisig as u8]), 20);
        // A CHECKSIG byte inside push data is data, not an operation.
        assert_eq!(sigop_count(&[0x01, Opcode::CheckSig as u8]), 0);
    }
}
