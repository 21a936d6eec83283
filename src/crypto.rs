//! Shared-secret container for concentration uploads.
//!
//! Layout: `"sc" 0x00 <version>`, salt, AES-256-CTR ciphertext, then an
//! HMAC-SHA256 over everything before it. Both keys come from PBKDF2 over
//! the password and salt.

use openssl::hash::MessageDigest;
use openssl::memcmp;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use openssl::symm::{self, Cipher};
use secrecy::{ExposeSecret, Secret};

const MAGIC: [u8; 3] = [b's', b'c', 0x00];
const HEADER_LEN: usize = 4;
const HMAC_LEN: usize = 32;
const KEY_LEN: usize = 32;
const HALF_BLOCK: usize = 8;
const LATEST: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("missing password")]
    MissingPassword,
    #[error("ciphertext too short ({0} bytes)")]
    TooShort(usize),
    #[error("unknown header, is this encrypted data?")]
    UnknownHeader,
    #[error("bad password or corrupt data")]
    HmacMismatch,
    #[error("cipher failure: {0}")]
    Cipher(#[from] openssl::error::ErrorStack),
}

struct Version {
    salt_len: usize,
    expansion_count: usize,
}

fn version(tag: u8) -> Option<Version> {
    match tag {
        0 => Some(Version { salt_len: 16, expansion_count: 10_000 }),
        1 => Some(Version { salt_len: 32, expansion_count: 10_000 }),
        2 => Some(Version { salt_len: 32, expansion_count: 100_000 }),
        _ => None,
    }
}

struct Keys {
    hmac: Vec<u8>,
    cipher: Vec<u8>,
}

fn expand_keys(password: &Secret<String>, salt: &[u8], count: usize) -> Result<Keys, CryptoError> {
    let password = password.expose_secret();
    if password.is_empty() {
        return Err(CryptoError::MissingPassword);
    }

    let mut keys = vec![0u8; 2 * KEY_LEN];
    openssl::pkcs5::pbkdf2_hmac(password.as_bytes(), salt, count, MessageDigest::sha256(), &mut keys)?;
    let cipher = keys.split_off(KEY_LEN);

    Ok(Keys { hmac: keys, cipher })
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(data)?;

    Ok(signer.sign_to_vec()?)
}

/// CTR counter block: first half of the salt, then a big-endian counter
/// starting at 1.
fn counter_block(salt: &[u8]) -> [u8; 2 * HALF_BLOCK] {
    let mut iv = [0u8; 2 * HALF_BLOCK];
    iv[..HALF_BLOCK].copy_from_slice(&salt[..HALF_BLOCK]);
    iv[HALF_BLOCK..].copy_from_slice(&1u64.to_be_bytes());
    iv
}

pub fn decrypt(password: &Secret<String>, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < HEADER_LEN {
        return Err(CryptoError::TooShort(data.len()));
    }
    if data[..3] != MAGIC {
        return Err(CryptoError::UnknownHeader);
    }
    let version = version(data[3]).ok_or(CryptoError::UnknownHeader)?;
    if data.len() < HEADER_LEN + version.salt_len + HMAC_LEN {
        return Err(CryptoError::TooShort(data.len()));
    }

    let (body, expected) = data.split_at(data.len() - HMAC_LEN);
    let salt = &body[HEADER_LEN..HEADER_LEN + version.salt_len];
    let keys = expand_keys(password, salt, version.expansion_count)?;

    if !memcmp::eq(&hmac(&keys.hmac, body)?, expected) {
        return Err(CryptoError::HmacMismatch);
    }

    let ciphertext = &body[HEADER_LEN + version.salt_len..];
    Ok(symm::decrypt(
        Cipher::aes_256_ctr(),
        &keys.cipher,
        Some(&counter_block(salt)[..]),
        ciphertext,
    )?)
}

/// Encrypts with the latest container version and a random salt.
pub fn encrypt(password: &Secret<String>, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let latest = version(LATEST).ok_or(CryptoError::UnknownHeader)?;
    let mut salt = vec![0u8; latest.salt_len];
    openssl::rand::rand_bytes(&mut salt)?;

    encrypt_with_salt(password, data, &salt, latest.expansion_count)
}

fn encrypt_with_salt(
    password: &Secret<String>,
    data: &[u8],
    salt: &[u8],
    expansion_count: usize,
) -> Result<Vec<u8>, CryptoError> {
    let keys = expand_keys(password, salt, expansion_count)?;
    let ciphertext = symm::encrypt(
        Cipher::aes_256_ctr(),
        &keys.cipher,
        Some(&counter_block(salt)[..]),
        data,
    )?;

    let mut out = Vec::with_capacity(HEADER_LEN + salt.len() + ciphertext.len() + HMAC_LEN);
    out.extend_from_slice(&MAGIC);
    out.push(LATEST);
    out.extend_from_slice(salt);
    out.extend_from_slice(&ciphertext);
    let tag = hmac(&keys.hmac, &out)?;
    out.extend_from_slice(&tag);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::decode_base64;

    // Produced by an independent implementation of the container, salt 0..32.
    const REFERENCE: &str = "c2MAAgABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4fbPMY0xvNWPV4xHwBFzbhdQhwaDbNqzreET9QD2toMgpmgoI7KBmPqt+J+55uLoqYxEpPN51XtoumxVnc719XC6z4zm9baBVNiFSALYVtlghDRD8Tmai2QxQUqIyJaERtU5xZcbVFSe0=";
    const REFERENCE_PLAIN: &str =
        "dh,NO2_A,PM10_B\n2016-01-01 00:00:00,12.0,\n2016-01-01 01:00:00,14.5,20.0\n";

    fn password() -> Secret<String> {
        Secret::new("correct horse".to_string())
    }

    #[test]
    fn decrypts_reference_ciphertext() {
        let data = decode_base64(REFERENCE).unwrap();
        let plain = decrypt(&password(), &data).unwrap();
        assert_eq!(String::from_utf8(plain).unwrap(), REFERENCE_PLAIN);
    }

    #[test]
    fn encrypts_like_the_reference() {
        let salt: Vec<u8> = (0u8..32).collect();
        let out = encrypt_with_salt(&password(), REFERENCE_PLAIN.as_bytes(), &salt, 100_000).unwrap();
        assert_eq!(out, decode_base64(REFERENCE).unwrap());
    }

    #[test]
    fn round_trips_with_random_salt() {
        let sealed = encrypt(&password(), b"dh,X\n1,2\n").unwrap();
        assert_eq!(&sealed[..4], b"sc\x00\x02");
        assert_eq!(decrypt(&password(), &sealed).unwrap(), b"dh,X\n1,2\n");
    }

    #[test]
    fn wrong_password_fails_hmac() {
        let data = decode_base64(REFERENCE).unwrap();
        let wrong = Secret::new("battery staple".to_string());
        assert!(matches!(decrypt(&wrong, &data), Err(CryptoError::HmacMismatch)));
    }

    #[test]
    fn tampering_fails_hmac() {
        let mut data = decode_base64(REFERENCE).unwrap();
        data[40] ^= 0x01;
        assert!(matches!(decrypt(&password(), &data), Err(CryptoError::HmacMismatch)));
    }

    #[test]
    fn rejects_foreign_data() {
        assert!(matches!(decrypt(&password(), b"sc"), Err(CryptoError::TooShort(2))));
        assert!(matches!(
            decrypt(&password(), b"dh,NO2\n2016,1.0\n0123456789012345678901234567890123456789"),
            Err(CryptoError::UnknownHeader)
        ));
        assert!(matches!(
            decrypt(&password(), b"sc\x00\x02short"),
            Err(CryptoError::TooShort(_))
        ));
        let empty = Secret::new(String::new());
        let data = decode_base64(REFERENCE).unwrap();
        assert!(matches!(decrypt(&empty, &data), Err(CryptoError::MissingPassword)));
    }
}
