//! The concrete signature verifier injected into the script interpreter
//! and the alert channel. This is the only place in the workspace that
//! touches curve arithmetic.

use secp256k1::{Message, PublicKey, Secp256k1, Signature, VerifyOnly};

use utxod_script::Verifier;

pub struct EcdsaVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl EcdsaVerifier {
    pub fn new() -> EcdsaVerifier {
        EcdsaVerifier { secp: Secp256k1::verification_only() }
    }
}

impl Default for EcdsaVerifier {
    fn default() -> EcdsaVerifier {
        EcdsaVerifier::new()
    }
}

impl Verifier for EcdsaVerifier {
    fn verify(&self, pubkey: &[u8], signature: &[u8], message: &[u8; 32]) -> bool {
        // Wire signatures carry the hash-type byte after the DER body.
        let der = match signature.split_last() {
            Some((_, der)) if !der.is_empty() => der,
            _ => return false,
        };
        let message = match Message::from_slice(message) {
            Ok(message) => message,
            Err(_) => return false,
        };
        let pubkey = match PublicKey::from_slice(pubkey) {
            Ok(pubkey) => pubkey,
            Err(_) => return false,
        };
        let signature = match Signature::from_der(der) {
            Ok(signature) => signature,
            Err(_) => return false,
        };
        self.secp.verify(&message, &signature, &pubkey).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_never_verifies() {
        let verifier = EcdsaVerifier::new();
        assert!(!verifier.verify(&[0x02; 33], &[0x30, 0x00, 0x01], &[7u8; 32]));
        assert!(!verifier.verify(&[], &[], &[0u8; 32]));
    }

    #[test]
    fn a_real_signature_verifies() {
        use secp256k1::{Secp256k1, SecretKey};
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pubkey = PublicKey::from_secret_key(&secp, &secret);
        let digest = [7u8; 32];
        let signature = secp.sign(&Message::from_slice(&digest).unwrap(), &secret);
        let mut wire_signature = signature.serialize_der().to_vec();
        // Append the ALL hash type, as a spending input would.
        wire_signature.push(0x01);

        let verifier = EcdsaVerifier::new();
        assert!(verifier.verify(&pubkey.serialize(), &wire_signature, &digest));
        assert!(!verifier.verify(&pubkey.serialize(), &wire_signature, &[8u8; 32]));
    }
}
