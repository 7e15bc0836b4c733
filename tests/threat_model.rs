//! Properties of the artifact format an attacker holding the file could exploit.
//!
//! Case counts are small: every case runs the full-cost KDF.

use proptest::prelude::*;
use workspace_courier::{CourierError, PinCipher};

#[test]
fn test_same_input_never_gives_same_artifact() {
    // Threat: precomputed dictionaries across users of one deployment.
    let cipher = PinCipher::default();
    let first = cipher.seal(b"identical", "123456").unwrap();
    let second = cipher.seal(b"identical", "123456").unwrap();

    assert_ne!(first, second);
    assert_ne!(first.as_bytes()[..16], second.as_bytes()[..16], "salt reused");
    assert_eq!(&cipher.open(first.as_bytes(), "123456").unwrap()[..], b"identical");
    assert_eq!(&cipher.open(second.as_bytes(), "123456").unwrap()[..], b"identical");
}

#[test]
fn test_tampering_and_wrong_pin_look_the_same() {
    // Threat: an oracle that tells "wrong PIN" apart from "corrupted file".
    let cipher = PinCipher::default();
    let sealed = cipher.seal(b"credentials", "123456").unwrap();

    let wrong_pin = cipher.open(sealed.as_bytes(), "654321").unwrap_err();

    let mut tampered = sealed.into_bytes();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x80;
    let corrupted = cipher.open(&tampered, "123456").unwrap_err();

    assert!(matches!(wrong_pin, CourierError::AuthenticationFailure));
    assert!(matches!(corrupted, CourierError::AuthenticationFailure));
    assert_eq!(wrong_pin.to_string(), corrupted.to_string());
}

#[test]
fn test_swapped_salt_fails_closed() {
    // Threat: splicing the salt of one artifact onto another's frame.
    let cipher = PinCipher::default();
    let a = cipher.seal(b"first", "123456").unwrap().into_bytes();
    let b = cipher.seal(b"second", "123456").unwrap().into_bytes();

    let mut spliced = a[..16].to_vec();
    spliced.extend_from_slice(&b[16..]);
    assert!(matches!(
        cipher.open(&spliced, "123456"),
        Err(CourierError::AuthenticationFailure)
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(4))]

    #[test]
    fn seal_open_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        pin in "[0-9A-Za-z]{6,12}",
    ) {
        let cipher = PinCipher::default();
        let sealed = cipher.seal(&plaintext, &pin).unwrap();
        let opened = cipher.open(sealed.as_bytes(), &pin).unwrap();
        prop_assert_eq!(&opened[..], &plaintext[..]);
    }

    #[test]
    fn wrong_pin_always_fails(
        plaintext in prop::collection::vec(any::<u8>(), 0..64),
        pin in "[0-9]{6,8}",
        other in "[0-9]{6,8}",
    ) {
        prop_assume!(pin != other);
        let cipher = PinCipher::default();
        let sealed = cipher.seal(&plaintext, &pin).unwrap();
        prop_assert!(matches!(
            cipher.open(sealed.as_bytes(), &other),
            Err(CourierError::AuthenticationFailure)
        ));
    }
}
