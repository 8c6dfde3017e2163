//! Hash and signature primitives
//!
//! Thin wrappers over the hashing and ECDSA crates so callers never
//! touch digest state directly. `ecdsa_verify` upholds the contract the
//! script interpreter relies on: malformed input returns `false`, it
//! never panics and never raises.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256, used for message checksums, tx and block hashes.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// RIPEMD-160.
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(data).into()
}

/// RIPEMD-160 of SHA-256, the address-hash form.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

/// Verify a DER-encoded ECDSA signature over a 32-byte hash.
///
/// Any malformed component (signature, public key) yields `false`.
pub fn ecdsa_verify(hash: &[u8; 32], sig_der: &[u8], pubkey: &[u8]) -> bool {
    let secp = secp256k1::Secp256k1::verification_only();
    let Ok(msg) = secp256k1::Message::from_digest_slice(hash) else {
        return false;
    };
    let Ok(key) = secp256k1::PublicKey::from_slice(pubkey) else {
        return false;
    };
    let Ok(sig) = secp256k1::ecdsa::Signature::from_der(sig_der) else {
        return false;
    };
    secp.verify_ecdsa(&msg, &sig, &key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_sha256_vector() {
        assert_eq!(
            sha256(b"abc"),
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_ripemd160_vector() {
        assert_eq!(sha256d(b"abc"), sha256(&sha256(b"abc")));
        assert_eq!(
            ripemd160(b"abc"),
            hex!("8eb208f7e05d987a9b044a8e98c6b087f15a0bfc")
        );
    }

    #[test]
    fn test_hash160_composes() {
        let data = b"btclite";
        assert_eq!(hash160(data), ripemd160(&sha256(data)));
    }

    #[test]
    fn test_ecdsa_verify_roundtrip() {
        let secp = secp256k1::Secp256k1::new();
        let secret = secp256k1::SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pubkey = secp256k1::PublicKey::from_secret_key(&secp, &secret);
        let hash = sha256(b"signed payload");
        let msg = secp256k1::Message::from_digest_slice(&hash).unwrap();
        let sig = secp.sign_ecdsa(&msg, &secret).serialize_der();

        assert!(ecdsa_verify(&hash, &sig, &pubkey.serialize()));
        assert!(!ecdsa_verify(&sha256(b"other payload"), &sig, &pubkey.serialize()));
    }

    #[test]
    fn test_ecdsa_verify_malformed_inputs_return_false() {
        let hash = sha256(b"x");
        assert!(!ecdsa_verify(&hash, &[], &[]));
        assert!(!ecdsa_verify(&hash, &[0x30, 0x00], &[0x02; 33]));
        assert!(!ecdsa_verify(&hash, &[0xff; 72], &[0x04; 65]));
    }
}
