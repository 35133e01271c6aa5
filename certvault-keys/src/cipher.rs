//! Encryption of short secrets at rest.
//!
//! Two policies share the same AES-256-GCM primitive:
//! * deterministic: the nonce is a PRF (HKDF-SHA256) of the plaintext, so the
//!   same plaintext under the same key always yields the same ciphertext.
//!   Used only for certificate identifiers, which are looked up by equality.
//! * randomized: a fresh random nonce per call. Used for passwords, which are
//!   never compared in encrypted form.
//!
//! Each purpose derives its own subkeys and AAD from its configured key, so a
//! ciphertext produced for one purpose never decrypts under another.
//!
//! Wire format: URL-safe base64 (no padding) of `nonce(12) || ciphertext+tag`.

use crate::config::CipherConfig;
use crate::error::{CertError, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const GENERIC_LABEL: &str = "generic";

/// What a secret is used for; each purpose has an independent key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretPurpose {
    KeystorePassword,
    PrivateKeyPassword,
    CertificateId,
}

/// How ciphertexts for a purpose are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherPolicy {
    Deterministic,
    Randomized,
}

impl SecretPurpose {
    fn label(&self) -> &'static str {
        match self {
            SecretPurpose::KeystorePassword => "keystore-password",
            SecretPurpose::PrivateKeyPassword => "private-key-password",
            SecretPurpose::CertificateId => "certificate-id",
        }
    }

    pub fn policy(&self) -> CipherPolicy {
        match self {
            SecretPurpose::CertificateId => CipherPolicy::Deterministic,
            SecretPurpose::KeystorePassword | SecretPurpose::PrivateKeyPassword => {
                CipherPolicy::Randomized
            }
        }
    }
}

/* -------------------------------------------------------------------------
 * Per-purpose key material
 * ---------------------------------------------------------------------- */

struct PurposeKeys {
    enc: Zeroizing<[u8; KEY_LEN]>,
    siv: Zeroizing<[u8; KEY_LEN]>,
    aad: Vec<u8>,
}

impl PurposeKeys {
    fn derive(purpose_key: &str, label: &str) -> Result<Self> {
        if purpose_key.is_empty() {
            return Err(CertError::InvalidArgument(
                "encryption key must not be empty".to_string(),
            ));
        }
        let ikm = purpose_key.as_bytes();
        Ok(Self {
            enc: hkdf_derive(ikm, format!("certvault:cipher:v1|enc|{label}").as_bytes())?,
            siv: hkdf_derive(ikm, format!("certvault:cipher:v1|siv|{label}").as_bytes())?,
            aad: format!("certvault:secret:v1|purpose={label}").into_bytes(),
        })
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.enc[..])
            .map_err(|e| CertError::InternalFailure(format!("AES init failed: {e}")))
    }

    // HKDF-Extract keyed by the SIV key acts as HMAC-SHA256 over the plaintext
    fn synthetic_nonce(&self, plaintext: &[u8]) -> Result<[u8; NONCE_LEN]> {
        let hk = Hkdf::<Sha256>::new(Some(&self.siv[..]), plaintext);
        let mut nonce = [0u8; NONCE_LEN];
        hk.expand(b"certvault:siv-nonce", &mut nonce)
            .map_err(|e| CertError::InternalFailure(format!("HKDF error: {e}")))?;
        Ok(nonce)
    }

    fn encrypt_with_nonce(&self, nonce: [u8; NONCE_LEN], plaintext: &[u8]) -> Result<String> {
        let ciphertext = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &self.aad,
                },
            )
            .map_err(|e| CertError::InternalFailure(format!("Encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    fn decrypt_raw(&self, ciphertext_text: &str) -> Result<([u8; NONCE_LEN], String)> {
        if ciphertext_text.is_empty() {
            return Err(CertError::InvalidArgument(
                "ciphertext must not be empty".to_string(),
            ));
        }
        let raw = URL_SAFE_NO_PAD
            .decode(ciphertext_text)
            .map_err(|e| CertError::InvalidArgument(format!("ciphertext is not base64: {e}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(CertError::InvalidArgument("ciphertext too short".to_string()));
        }
        let (nonce_bytes, body) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher()?
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: body,
                    aad: &self.aad,
                },
            )
            .map_err(|_| {
                CertError::InvalidArgument("ciphertext cannot be decrypted with this key".into())
            })?;
        let plaintext = String::from_utf8(plain)
            .map_err(|_| CertError::InvalidArgument("decrypted secret is not UTF-8".into()))?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok((nonce, plaintext))
    }

    fn encrypt_deterministic(&self, plaintext: &str) -> Result<String> {
        let nonce = self.synthetic_nonce(plaintext.as_bytes())?;
        self.encrypt_with_nonce(nonce, plaintext.as_bytes())
    }

    fn decrypt_deterministic(&self, ciphertext_text: &str) -> Result<String> {
        let (nonce, plaintext) = self.decrypt_raw(ciphertext_text)?;
        if self.synthetic_nonce(plaintext.as_bytes())? != nonce {
            return Err(CertError::InvalidArgument(
                "ciphertext was not produced deterministically".to_string(),
            ));
        }
        Ok(plaintext)
    }

    fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.encrypt_with_nonce(nonce, plaintext.as_bytes())
    }

    fn open(&self, ciphertext_text: &str) -> Result<String> {
        self.decrypt_raw(ciphertext_text).map(|(_, plaintext)| plaintext)
    }
}

fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| CertError::InternalFailure(format!("HKDF error: {e}")))?;
    Ok(okm)
}

/* -------------------------------------------------------------------------
 * Stateless helpers: `(text, purposeKey)` contracts
 * ---------------------------------------------------------------------- */

/// Deterministic encryption: equal inputs give equal ciphertexts
pub fn encrypt_deterministic(plaintext: &str, purpose_key: &str) -> Result<String> {
    PurposeKeys::derive(purpose_key, GENERIC_LABEL)?.encrypt_deterministic(plaintext)
}

pub fn decrypt_deterministic(ciphertext: &str, purpose_key: &str) -> Result<String> {
    PurposeKeys::derive(purpose_key, GENERIC_LABEL)?.decrypt_deterministic(ciphertext)
}

/// Randomized authenticated encryption with a fresh nonce per call
pub fn seal(plaintext: &str, purpose_key: &str) -> Result<String> {
    PurposeKeys::derive(purpose_key, GENERIC_LABEL)?.seal(plaintext)
}

pub fn open(ciphertext: &str, purpose_key: &str) -> Result<String> {
    PurposeKeys::derive(purpose_key, GENERIC_LABEL)?.open(ciphertext)
}

/* -------------------------------------------------------------------------
 * SecretCipher
 * ---------------------------------------------------------------------- */

/// Holds the derived keys for all three purposes for the process lifetime
pub struct SecretCipher {
    keystore_password: PurposeKeys,
    private_key_password: PurposeKeys,
    certificate_id: PurposeKeys,
}

impl SecretCipher {
    pub fn new(config: &CipherConfig) -> Result<Self> {
        let build = |purpose: SecretPurpose, key: &str| PurposeKeys::derive(key, purpose.label());
        Ok(Self {
            keystore_password: build(
                SecretPurpose::KeystorePassword,
                &config.keystore_password_key,
            )?,
            private_key_password: build(
                SecretPurpose::PrivateKeyPassword,
                &config.private_key_password_key,
            )?,
            certificate_id: build(SecretPurpose::CertificateId, &config.certificate_id_key)?,
        })
    }

    fn keys(&self, purpose: SecretPurpose) -> &PurposeKeys {
        match purpose {
            SecretPurpose::KeystorePassword => &self.keystore_password,
            SecretPurpose::PrivateKeyPassword => &self.private_key_password,
            SecretPurpose::CertificateId => &self.certificate_id,
        }
    }

    pub fn encrypt(&self, purpose: SecretPurpose, plaintext: &str) -> Result<String> {
        let keys = self.keys(purpose);
        match purpose.policy() {
            CipherPolicy::Deterministic => keys.encrypt_deterministic(plaintext),
            CipherPolicy::Randomized => keys.seal(plaintext),
        }
    }

    pub fn decrypt(&self, purpose: SecretPurpose, ciphertext: &str) -> Result<String> {
        let keys = self.keys(purpose);
        match purpose.policy() {
            CipherPolicy::Deterministic => keys.decrypt_deterministic(ciphertext),
            CipherPolicy::Randomized => keys.open(ciphertext),
        }
    }

    pub fn encrypt_keystore_password(&self, password: &str) -> Result<String> {
        self.encrypt(SecretPurpose::KeystorePassword, password)
    }

    pub fn decrypt_keystore_password(&self, encrypted: &str) -> Result<String> {
        self.decrypt(SecretPurpose::KeystorePassword, encrypted)
    }

    pub fn encrypt_private_key_password(&self, password: &str) -> Result<String> {
        self.encrypt(SecretPurpose::PrivateKeyPassword, password)
    }

    pub fn decrypt_private_key_password(&self, encrypted: &str) -> Result<String> {
        self.decrypt(SecretPurpose::PrivateKeyPassword, encrypted)
    }

    pub fn encrypt_certificate_id(&self, id: &str) -> Result<String> {
        self.encrypt(SecretPurpose::CertificateId, id)
    }

    pub fn decrypt_certificate_id(&self, encrypted: &str) -> Result<String> {
        self.decrypt(SecretPurpose::CertificateId, encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(&CipherConfig::generate()).unwrap()
    }

    #[test]
    fn round_trip_for_every_purpose() {
        let c = cipher();
        for purpose in [
            SecretPurpose::KeystorePassword,
            SecretPurpose::PrivateKeyPassword,
            SecretPurpose::CertificateId,
        ] {
            let enc = c.encrypt(purpose, "s3cret-value").unwrap();
            assert_ne!(enc, "s3cret-value");
            assert_eq!(c.decrypt(purpose, &enc).unwrap(), "s3cret-value");
        }
    }

    #[test]
    fn certificate_ids_encrypt_deterministically() {
        let c = cipher();
        let a = c.encrypt_certificate_id("0f6c1a52-id").unwrap();
        let b = c.encrypt_certificate_id("0f6c1a52-id").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c.encrypt_certificate_id("other-id").unwrap());
    }

    #[test]
    fn passwords_encrypt_with_fresh_nonces() {
        let c = cipher();
        let a = c.encrypt_keystore_password("hunter2").unwrap();
        let b = c.encrypt_keystore_password("hunter2").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt_keystore_password(&a).unwrap(), "hunter2");
        assert_eq!(c.decrypt_keystore_password(&b).unwrap(), "hunter2");
    }

    #[test]
    fn purposes_do_not_cross_decrypt_even_with_shared_key() {
        let shared = CipherConfig::generate().certificate_id_key;
        let cfg = CipherConfig {
            keystore_password_key: shared.clone(),
            private_key_password_key: shared.clone(),
            certificate_id_key: shared,
        };
        let c = SecretCipher::new(&cfg).unwrap();
        let enc = c.encrypt_keystore_password("pw").unwrap();
        assert!(matches!(
            c.decrypt_private_key_password(&enc),
            Err(CertError::InvalidArgument(_))
        ));
    }

    #[test]
    fn stateless_helpers_follow_the_same_contract() {
        let key = "purpose-key";
        let a = encrypt_deterministic("secret", key).unwrap();
        assert_eq!(a, encrypt_deterministic("secret", key).unwrap());
        assert_eq!(decrypt_deterministic(&a, key).unwrap(), "secret");

        let s = seal("secret", key).unwrap();
        assert_eq!(open(&s, key).unwrap(), "secret");
        // A randomized ciphertext is rejected by the deterministic decryptor
        assert!(decrypt_deterministic(&s, key).is_err());
    }

    #[test]
    fn empty_key_or_ciphertext_is_invalid_argument() {
        assert!(matches!(
            encrypt_deterministic("x", ""),
            Err(CertError::InvalidArgument(_))
        ));
        assert!(matches!(open("", "k"), Err(CertError::InvalidArgument(_))));
        assert!(matches!(
            open("not base64 !!", "k"),
            Err(CertError::InvalidArgument(_))
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let enc = seal("secret", "key-one").unwrap();
        assert!(matches!(
            open(&enc, "key-two"),
            Err(CertError::InvalidArgument(_))
        ));
    }
}
