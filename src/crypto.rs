//! Crypto collaborator: wraps a fresh session key for the handshake, then
//! encrypts/decrypts every frame body that follows it.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::cipher::block_padding::{Pkcs7, UnpadError};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;

use crate::error::{CmError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha1 = Hmac<Sha1>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// A freshly minted 256-bit session key, plus its RSA-wrapped form as sent
/// in `ChannelEncryptResponse`.
pub struct SessionKeyMaterial {
    pub plain: [u8; 32],
    pub encrypted: Vec<u8>,
}

/// Generates a random session key and wraps it for transmission with
/// RSA-OAEP(SHA1) under the vendor's universe public key.
pub fn generate_session_key(pubkey: &RsaPublicKey) -> Result<SessionKeyMaterial> {
    let mut plain = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut plain);

    let mut rng = rand::thread_rng();
    let encrypted = pubkey
        .encrypt(&mut rng, Oaep::new::<Sha1>(), &plain)
        .map_err(|e| CmError::Protocol(format!("session key wrap failed: {e}")))?;

    Ok(SessionKeyMaterial { plain, encrypted })
}

/// Encrypts `plaintext` under `key`. Output is `iv (16) || hmac tag (16) ||
/// ciphertext`: the tag authenticates the IV and ciphertext together so a
/// tampered or truncated frame is rejected before it reaches the padding
/// unwrap.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let tag = mac_tag(key, &iv, &ciphertext);

    let mut out = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&ciphertext);
    out
}

/// Reverses [`encrypt`]. Fails if the frame is too short, the HMAC tag does
/// not match, or the recovered padding is invalid.
pub fn decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN + TAG_LEN {
        return Err(CmError::Protocol("encrypted frame too short".into()));
    }
    let iv = &data[..IV_LEN];
    let tag = &data[IV_LEN..IV_LEN + TAG_LEN];
    let ciphertext = &data[IV_LEN + TAG_LEN..];

    let expected = mac_tag(key, iv, ciphertext);
    if expected != tag {
        return Err(CmError::Protocol("encrypted frame failed authentication".into()));
    }

    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e: UnpadError| CmError::Protocol(format!("padding invalid: {e}")))
}

/// Authenticates with HMAC-SHA1 over only the first 16 bytes of the session
/// key, not the full 32.
fn mac_tag(key: &[u8; 32], iv: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = HmacSha1::new_from_slice(&key[..16]).expect("hmac accepts any key length");
    mac.update(iv);
    mac.update(ciphertext);
    let full = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&full[..TAG_LEN]);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = [7u8; 32];
        let plaintext = b"channel encrypt result payload";
        let frame = encrypt(&key, plaintext);
        let recovered = decrypt(&key, &frame).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn tampered_frame_fails_authentication() {
        let key = [3u8; 32];
        let mut frame = encrypt(&key, b"hello");
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(decrypt(&key, &frame).is_err());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let frame = encrypt(&[1u8; 32], b"hello");
        assert!(decrypt(&[2u8; 32], &frame).is_err());
    }

    #[test]
    fn session_key_wraps_and_is_recoverable() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public_key = RsaPublicKey::from(&private_key);

        let material = generate_session_key(&public_key).unwrap();
        assert_eq!(material.plain.len(), 32);

        let recovered = private_key
            .decrypt(Oaep::new::<Sha1>(), &material.encrypted)
            .unwrap();
        assert_eq!(recovered, material.plain);
    }
}
