//! End-to-end script verification over real transactions: standard
//! pay-to-pubkey-hash and pay-to-script-hash spends.

use btclite::crypto;
use btclite::error::ScriptError;
use btclite::script::opcodes::*;
use btclite::script::{correctly_spends, Script};
use btclite::wire::messages::SIGHASH_ALL;
use btclite::wire::{OutPoint, Transaction, TxInput, TxOutput};

fn keypair(secret_byte: u8) -> (secp256k1::SecretKey, Vec<u8>) {
    let secp = secp256k1::Secp256k1::new();
    let secret = secp256k1::SecretKey::from_slice(&[secret_byte; 32]).unwrap();
    let pubkey = secp256k1::PublicKey::from_secret_key(&secp, &secret);
    (secret, pubkey.serialize().to_vec())
}

fn sign(hash: &[u8; 32], secret: &secp256k1::SecretKey) -> Vec<u8> {
    let secp = secp256k1::Secp256k1::new();
    let msg = secp256k1::Message::from_digest_slice(hash).unwrap();
    let mut sig = secp.sign_ecdsa(&msg, secret).serialize_der().to_vec();
    sig.push(SIGHASH_ALL);
    sig
}

fn spending_transaction(script_sig: Vec<u8>) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint {
                hash: [0x42; 32],
                index: 1,
            },
            script_sig,
            sequence: 0xffff_ffff,
        }],
        outputs: vec![TxOutput {
            value: 40_0000_0000,
            script_pubkey: vec![OP_1],
        }],
        lock_time: 0,
    }
}

fn p2pkh_script_pubkey(pubkey: &[u8]) -> Vec<u8> {
    let mut program = vec![OP_DUP, OP_HASH160];
    Script::push_data(&mut program, &crypto::hash160(pubkey));
    program.push(OP_EQUALVERIFY);
    program.push(OP_CHECKSIG);
    program
}

#[test]
fn test_p2pkh_spend_verifies() {
    let (secret, pubkey) = keypair(0x11);
    let script_pubkey_prog = p2pkh_script_pubkey(&pubkey);

    // The connected script of a fresh P2PKH spend is the whole output
    // script, so the signature hash is fixed before signing.
    let unsigned = spending_transaction(Vec::new());
    let sighash = unsigned.signature_hash(0, &script_pubkey_prog, SIGHASH_ALL);
    let sig = sign(&sighash, &secret);

    let mut script_sig_prog = Vec::new();
    Script::push_data(&mut script_sig_prog, &sig);
    Script::push_data(&mut script_sig_prog, &pubkey);

    let tx = spending_transaction(script_sig_prog.clone());
    let script_sig = Script::new(script_sig_prog).unwrap();
    let script_pubkey = Script::new(script_pubkey_prog).unwrap();

    correctly_spends(&tx, 0, &script_sig, &script_pubkey, true).unwrap();
}

#[test]
fn test_p2pkh_spend_rejects_tampered_signature() {
    let (secret, pubkey) = keypair(0x22);
    let script_pubkey_prog = p2pkh_script_pubkey(&pubkey);

    let unsigned = spending_transaction(Vec::new());
    let sighash = unsigned.signature_hash(0, &script_pubkey_prog, SIGHASH_ALL);
    let mut sig = sign(&sighash, &secret);
    // Corrupt one bit of the DER body, leaving the sighash byte alone.
    sig[10] ^= 0x01;

    let mut script_sig_prog = Vec::new();
    Script::push_data(&mut script_sig_prog, &sig);
    Script::push_data(&mut script_sig_prog, &pubkey);

    let tx = spending_transaction(script_sig_prog.clone());
    let script_sig = Script::new(script_sig_prog).unwrap();
    let script_pubkey = Script::new(script_pubkey_prog).unwrap();

    let result = correctly_spends(&tx, 0, &script_sig, &script_pubkey, true);
    assert_eq!(result, Err(ScriptError::FalseStack));
    assert_eq!(
        result.unwrap_err().to_string(),
        "Script resulted in a non-true stack"
    );
}

#[test]
fn test_p2pkh_spend_rejects_wrong_key() {
    let (secret, _) = keypair(0x33);
    let (_, other_pubkey) = keypair(0x44);
    let script_pubkey_prog = p2pkh_script_pubkey(&other_pubkey);

    let unsigned = spending_transaction(Vec::new());
    let sighash = unsigned.signature_hash(0, &script_pubkey_prog, SIGHASH_ALL);
    let sig = sign(&sighash, &secret);

    let mut script_sig_prog = Vec::new();
    Script::push_data(&mut script_sig_prog, &sig);
    // The signer's key does not hash to the pinned key hash.
    let (_, signer_pubkey) = keypair(0x33);
    Script::push_data(&mut script_sig_prog, &signer_pubkey);

    let tx = spending_transaction(script_sig_prog.clone());
    let script_sig = Script::new(script_sig_prog).unwrap();
    let script_pubkey = Script::new(script_pubkey_prog).unwrap();

    assert_eq!(
        correctly_spends(&tx, 0, &script_sig, &script_pubkey, true),
        Err(ScriptError::VerifyFailed("OP_EQUALVERIFY"))
    );
}

#[test]
fn test_p2sh_spend_with_inner_checksig() {
    let (secret, pubkey) = keypair(0x55);

    // Inner program: <pubkey> OP_CHECKSIG.
    let mut inner = Vec::new();
    Script::push_data(&mut inner, &pubkey);
    inner.push(OP_CHECKSIG);

    let mut script_pubkey_prog = vec![OP_HASH160];
    Script::push_data(&mut script_pubkey_prog, &crypto::hash160(&inner));
    script_pubkey_prog.push(OP_EQUAL);

    // Inside the inner execution the connected script is the inner
    // program itself.
    let unsigned = spending_transaction(Vec::new());
    let sighash = unsigned.signature_hash(0, &inner, SIGHASH_ALL);
    let sig = sign(&sighash, &secret);

    let mut script_sig_prog = Vec::new();
    Script::push_data(&mut script_sig_prog, &sig);
    Script::push_data(&mut script_sig_prog, &inner);

    let tx = spending_transaction(script_sig_prog.clone());
    let script_sig = Script::new(script_sig_prog).unwrap();
    let script_pubkey = Script::new(script_pubkey_prog).unwrap();
    assert!(script_pubkey.is_pay_to_script_hash());

    correctly_spends(&tx, 0, &script_sig, &script_pubkey, true).unwrap();

    // A wrong inner signature survives the hash comparison but fails
    // the enforced inner execution.
    let (wrong_secret, _) = keypair(0x56);
    let wrong_sig = sign(&sighash, &wrong_secret);
    let mut wrong_sig_prog = Vec::new();
    Script::push_data(&mut wrong_sig_prog, &wrong_sig);
    Script::push_data(&mut wrong_sig_prog, &inner);

    let tx = spending_transaction(wrong_sig_prog.clone());
    let wrong_script_sig = Script::new(wrong_sig_prog).unwrap();
    assert_eq!(
        correctly_spends(&tx, 0, &wrong_script_sig, &script_pubkey, true),
        Err(ScriptError::FalseStack)
    );
    correctly_spends(&tx, 0, &wrong_script_sig, &script_pubkey, false).unwrap();
}
