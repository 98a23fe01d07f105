use proptest::prelude::*;

use mesh_crypto::{
    CryptoError, KeyAnnouncement, KeyPair, SharedKey, decrypt_envelope, encrypt_envelope, verify,
};

// Key generation is comparatively slow; keep case counts modest.
fn config() -> ProptestConfig {
    ProptestConfig::with_cases(32)
}

// --- Envelope ---

proptest! {
    #![proptest_config(config())]

    #[test]
    fn envelope_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let env = encrypt_envelope(&a.agreement, &b.agreement_public(), &plaintext).unwrap();
        let out = decrypt_envelope(&b.agreement, &a.agreement_public(), &env).unwrap();
        prop_assert_eq!(out, plaintext);
    }

    #[test]
    fn any_bit_flip_fails_closed(
        plaintext in proptest::collection::vec(any::<u8>(), 1..512),
        pos in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let key = SharedKey::derive(&a.agreement, &b.agreement_public()).unwrap();
        let mut env = key.seal(&plaintext).unwrap();
        let idx = pos.index(env.ciphertext.len());
        env.ciphertext[idx] ^= 1 << bit;
        prop_assert_eq!(key.open(&env), Err(CryptoError::Decrypt));
    }

    #[test]
    fn iv_flip_fails_closed(pos in 0usize..12, bit in 0u8..8) {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let key = SharedKey::derive(&a.agreement, &b.agreement_public()).unwrap();
        let mut env = key.seal(b"fixed payload").unwrap();
        env.iv[pos] ^= 1 << bit;
        prop_assert!(key.open(&env).is_err());
    }
}

// --- Signatures ---

proptest! {
    #![proptest_config(config())]

    #[test]
    fn signature_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let kp = KeyPair::generate();
        let sig = kp.signing.sign(&data);
        prop_assert!(verify(&kp.verifying_key(), &data, &sig).is_ok());
    }

    #[test]
    fn signature_rejects_other_data(
        data in proptest::collection::vec(any::<u8>(), 1..256),
        other in proptest::collection::vec(any::<u8>(), 1..256),
    ) {
        prop_assume!(data != other);
        let kp = KeyPair::generate();
        let sig = kp.signing.sign(&data);
        prop_assert!(verify(&kp.verifying_key(), &other, &sig).is_err());
    }
}

// --- Fixed scenarios ---

#[test]
fn wrong_private_key_rejects() {
    let a = KeyPair::generate();
    let b = KeyPair::generate();
    let c = KeyPair::generate();
    let env = encrypt_envelope(&a.agreement, &b.agreement_public(), b"for b only").unwrap();
    assert_eq!(
        decrypt_envelope(&c.agreement, &a.agreement_public(), &env),
        Err(CryptoError::Decrypt)
    );
}

#[test]
fn announced_key_is_usable_for_encryption() {
    let a = KeyPair::generate();
    let b = KeyPair::generate();

    let wire = serde_json::to_string(&KeyAnnouncement::create(&b)).unwrap();
    let received: KeyAnnouncement = serde_json::from_str(&wire).unwrap();
    let b_pub = received.verify().unwrap();

    let env = encrypt_envelope(&a.agreement, &b_pub, b"hello").unwrap();
    let pt = decrypt_envelope(&b.agreement, &a.agreement_public(), &env).unwrap();
    assert_eq!(pt, b"hello");
    assert_eq!(received.fingerprint(), b.agreement_public().fingerprint());
}
