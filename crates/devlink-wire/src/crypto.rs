//! Payload cryptography (spec.md §4.1).
//!
//! "1.0" frames are AES-128-ECB under a key derived from the timestamp;
//! "L01" frames are AES-128-CBC under a key+IV derived from the HELLO
//! nonce exchange. MD5 is used here only because it matches on-wire device
//! firmware key derivation, not as a security primitive.

use aes::Aes128;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit, block_padding::Pkcs7};

use crate::error::{Error, Result};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;

/// `K = md5(local_key || timestamp)` for legacy "1.0" frames.
///
/// `timestamp` is concatenated as its ASCII decimal representation, matching
/// the byte-level convention the rest of this wire format uses for
/// stringified integers (see the RPC envelope's `t` field in spec.md §6).
pub fn legacy_key(local_key: &[u8], timestamp: u32) -> [u8; 16] {
    let mut buf = Vec::with_capacity(local_key.len() + 10);
    buf.extend_from_slice(local_key);
    buf.extend_from_slice(timestamp.to_string().as_bytes());
    md5::compute(&buf).0
}

/// `K, IV` for "L01" frames, derived from the HELLO nonce exchange.
///
/// `K = md5(local_key || connect_nonce || ack_nonce)`,
/// `IV = md5(K || connect_nonce || ack_nonce)[0..16]`.
/// Nonces are serialized as big-endian `u16` when hashed.
pub fn l01_key_iv(local_key: &[u8], connect_nonce: u16, ack_nonce: u16) -> ([u8; 16], [u8; 16]) {
    let mut k_buf = Vec::with_capacity(local_key.len() + 4);
    k_buf.extend_from_slice(local_key);
    k_buf.extend_from_slice(&connect_nonce.to_be_bytes());
    k_buf.extend_from_slice(&ack_nonce.to_be_bytes());
    let k = md5::compute(&k_buf).0;

    let mut iv_buf = Vec::with_capacity(16 + 4);
    iv_buf.extend_from_slice(&k);
    iv_buf.extend_from_slice(&connect_nonce.to_be_bytes());
    iv_buf.extend_from_slice(&ack_nonce.to_be_bytes());
    let iv = md5::compute(&iv_buf).0;

    (k, iv)
}

pub fn ecb_encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes128EcbEnc::new(key.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub fn ecb_decrypt(key: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    Aes128EcbDec::new(key.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| Error::DecryptFail(format!("ecb: {e}")))
}

pub fn cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub fn cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| Error::DecryptFail(format!("cbc: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecb_round_trips() {
        let key = legacy_key(b"abcdefghijklmnop", 1_700_000_000);
        let plaintext = br#"{"dps":{"101":"hello"}}"#;
        let ct = ecb_encrypt(&key, plaintext);
        let pt = ecb_decrypt(&key, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn cbc_round_trips() {
        let (k, iv) = l01_key_iv(b"abcdefghijklmnop", 4242, 54321);
        let plaintext = br#"{"dps":{"101":{"id":1}}}"#;
        let ct = cbc_encrypt(&k, &iv, plaintext);
        let pt = cbc_decrypt(&k, &iv, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn cbc_decrypt_with_wrong_key_fails_or_garbles() {
        let (k, iv) = l01_key_iv(b"abcdefghijklmnop", 1, 2);
        let ct = cbc_encrypt(&k, &iv, b"payload-bytes-here");
        let (wrong_k, _) = l01_key_iv(b"zzzzzzzzzzzzzzzz", 1, 2);
        // Either the unpad fails, or it "succeeds" with garbage; either way
        // it must not silently equal the original plaintext.
        let result = cbc_decrypt(&wrong_k, &iv, &ct);
        if let Ok(pt) = result {
            assert_ne!(pt, b"payload-bytes-here");
        }
    }
}
