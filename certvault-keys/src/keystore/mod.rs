//! Password-protected keystore containers.
//!
//! A container holds at most one certificate + private key entry under a
//! single alias. Serialized layout:
//!
//! ```text
//! "CVKS" | version (1) | pbkdf2 iterations (u32 BE) | salt (16) | nonce (12) | AES-256-GCM(body)
//! ```
//!
//! The header up to and including the salt is bound as AAD, the key comes
//! from PBKDF2-HMAC-SHA256 over the container password, and the body is a
//! bincode list of entries whose private keys are themselves PKCS#8
//! encrypted under the entry password.

pub mod storage;

use crate::codec::{KeyPair, X509Certificate};
use crate::config::KeystoreConfig;
use crate::error::{CertError, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use certvault_common::Logger;
use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use zeroize::Zeroizing;

pub use storage::{ContainerStorage, FileContainerStorage, MemoryContainerStorage};

const MAGIC: &[u8; 4] = b"CVKS";
const VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + 1 + 4 + SALT_LEN;
const MAX_KDF_ITERATIONS: u32 = 10_000_000;

#[derive(Clone, Serialize, Deserialize)]
struct SealedEntry {
    alias: String,
    certificate_der: Vec<u8>,
    encrypted_key_der: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ContainerBody {
    alias: String,
    entries: Vec<SealedEntry>,
}

/// Open, in-memory view of one keystore container
pub struct KeystoreContainer {
    alias: String,
    password: Zeroizing<String>,
    entry: Option<SealedEntry>,
}

impl KeystoreContainer {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entry.as_ref().is_some_and(|e| e.alias == alias)
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}

impl fmt::Debug for KeystoreContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreContainer")
            .field("alias", &"<redacted>")
            .field("occupied", &self.entry.is_some())
            .finish()
    }
}

/// Exclusive per-alias locks.
///
/// A lock entry lives only while some caller holds or waits for it.
#[derive(Default)]
pub struct ContainerLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the exclusive lock for `alias`
    pub fn with_lock<R>(&self, alias: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(alias.to_string()).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // clones are taken and dropped only under the map lock
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            locks.remove(alias);
        }
        drop(lock);
        drop(locks);
        result
    }

    /// Number of aliases currently locked or awaited
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Creates, fills, reads and (de)serializes keystore containers
pub struct KeystoreStore {
    kdf_iterations: u32,
    locks: ContainerLocks,
    logger: Arc<Logger>,
}

impl KeystoreStore {
    pub fn new(config: &KeystoreConfig, logger: Arc<Logger>) -> Result<Self> {
        if config.kdf_iterations == 0 || config.kdf_iterations > MAX_KDF_ITERATIONS {
            return Err(CertError::InvalidArgument(format!(
                "kdf_iterations must be between 1 and {MAX_KDF_ITERATIONS}"
            )));
        }
        Ok(Self {
            kdf_iterations: config.kdf_iterations,
            locks: ContainerLocks::new(),
            logger,
        })
    }

    /// Run `f` while holding the exclusive lock for `alias`
    pub fn with_lock<R>(&self, alias: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.locks.with_lock(alias, f)
    }

    /// Empty container bound to `alias`
    pub fn create(&self, alias: &str, container_password: &str) -> Result<KeystoreContainer> {
        if alias.is_empty() {
            return Err(CertError::InvalidArgument("alias must not be empty".into()));
        }
        if container_password.is_empty() {
            return Err(CertError::InvalidArgument(
                "container password must not be empty".into(),
            ));
        }
        Ok(KeystoreContainer {
            alias: alias.to_string(),
            password: Zeroizing::new(container_password.to_string()),
            entry: None,
        })
    }

    /// Store the certificate and key under `alias`, replacing any previous entry
    pub fn put(
        &self,
        container: &mut KeystoreContainer,
        alias: &str,
        certificate: &X509Certificate,
        key_pair: &KeyPair,
        entry_password: &str,
    ) -> Result<()> {
        if alias != container.alias {
            return Err(CertError::InvalidArgument(
                "container holds a single entry under its own alias".into(),
            ));
        }
        if entry_password.is_empty() {
            return Err(CertError::InvalidArgument(
                "entry password must not be empty".into(),
            ));
        }
        if !certificate.matches_key(key_pair)? {
            return Err(CertError::KeyMismatch);
        }
        container.entry = Some(SealedEntry {
            alias: alias.to_string(),
            certificate_der: certificate.der_bytes().to_vec(),
            encrypted_key_der: key_pair.encrypted_private_key_der(entry_password)?,
        });
        Ok(())
    }

    pub fn get(
        &self,
        container: &KeystoreContainer,
        alias: &str,
        entry_password: &str,
    ) -> Result<(X509Certificate, KeyPair)> {
        let entry = container
            .entry
            .as_ref()
            .filter(|e| e.alias == alias)
            .ok_or(CertError::AliasNotFound)?;
        let key_pair = KeyPair::from_encrypted_der(&entry.encrypted_key_der, entry_password)?;
        let certificate = X509Certificate::from_der(entry.certificate_der.clone())?;
        Ok((certificate, key_pair))
    }

    /// Certificate only; no entry password needed
    pub fn get_certificate(
        &self,
        container: &KeystoreContainer,
        alias: &str,
    ) -> Result<X509Certificate> {
        let entry = container
            .entry
            .as_ref()
            .filter(|e| e.alias == alias)
            .ok_or(CertError::AliasNotFound)?;
        X509Certificate::from_der(entry.certificate_der.clone())
    }

    pub fn remove(&self, container: &mut KeystoreContainer, alias: &str) -> Result<()> {
        if !container.contains(alias) {
            return Err(CertError::AliasNotFound);
        }
        container.entry = None;
        Ok(())
    }

    pub fn serialize(&self, container: &KeystoreContainer) -> Result<Vec<u8>> {
        let body = ContainerBody {
            alias: container.alias.clone(),
            entries: container.entry.iter().cloned().collect(),
        };
        let plaintext = Zeroizing::new(bincode::serialize(&body)?);

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + plaintext.len() + TAG_LEN);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&self.kdf_iterations.to_be_bytes());
        out.extend_from_slice(&salt);

        let cipher = container_cipher(&container.password, &salt, self.kdf_iterations)?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &out[..HEADER_LEN],
                },
            )
            .map_err(|_| CertError::InternalFailure("container encryption failed".into()))?;
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        self.logger.debug(format!(
            "Serialized keystore container ({} bytes)",
            out.len()
        ));
        Ok(out)
    }

    pub fn deserialize(&self, bytes: &[u8], container_password: &str) -> Result<KeystoreContainer> {
        if bytes.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(CertError::MalformedInput("keystore container is truncated".into()));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(CertError::MalformedInput("not a keystore container".into()));
        }
        let version = bytes[MAGIC.len()];
        if version != VERSION {
            return Err(CertError::MalformedInput(format!(
                "unsupported keystore container version {version}"
            )));
        }
        let mut iterations = [0u8; 4];
        iterations.copy_from_slice(&bytes[MAGIC.len() + 1..MAGIC.len() + 5]);
        let iterations = u32::from_be_bytes(iterations);
        if iterations == 0 || iterations > MAX_KDF_ITERATIONS {
            return Err(CertError::MalformedInput(format!(
                "implausible kdf iteration count {iterations}"
            )));
        }
        let salt = &bytes[MAGIC.len() + 5..HEADER_LEN];
        let nonce = &bytes[HEADER_LEN..HEADER_LEN + NONCE_LEN];
        let ciphertext = &bytes[HEADER_LEN + NONCE_LEN..];

        let cipher = container_cipher(container_password, salt, iterations)?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: &bytes[..HEADER_LEN],
                    },
                )
                .map_err(|_| {
                    CertError::WrongPassword("container password does not open the keystore".into())
                })?,
        );
        let body: ContainerBody = bincode::deserialize(&plaintext)
            .map_err(|e| CertError::MalformedInput(format!("corrupt keystore body: {e}")))?;
        if body.entries.len() > 1 || body.entries.iter().any(|e| e.alias != body.alias) {
            return Err(CertError::MalformedInput(
                "keystore container must hold one entry under its alias".into(),
            ));
        }

        Ok(KeystoreContainer {
            alias: body.alias,
            password: Zeroizing::new(container_password.to_string()),
            entry: body.entries.into_iter().next(),
        })
    }
}

fn container_cipher(password: &str, salt: &[u8], iterations: u32) -> Result<Aes256Gcm> {
    if password.is_empty() {
        return Err(CertError::InvalidArgument(
            "container password must not be empty".into(),
        ));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac(
        password.as_bytes(),
        salt,
        iterations as usize,
        MessageDigest::sha256(),
        &mut key[..],
    )?;
    Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| CertError::InternalFailure(format!("invalid container key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{KeyAlgorithm, KeyMaterialCodec, SubjectAttributes, ValidityPeriod};
    use certvault_common::Component;
    use std::thread;
    use std::time::Duration;

    fn store() -> KeystoreStore {
        let logger = Arc::new(Logger::new_root(Component::Keystore, "keystore-test"));
        KeystoreStore::new(&KeystoreConfig { kdf_iterations: 1_000 }, logger).unwrap()
    }

    fn identity() -> (X509Certificate, KeyPair) {
        let key = KeyMaterialCodec::generate_key_pair(KeyAlgorithm::EcdsaP256, 256).unwrap();
        let cert = KeyMaterialCodec::build_self_signed_certificate(
            &key,
            &SubjectAttributes::new("keystore.test"),
            &ValidityPeriod::days_from_now(30).unwrap(),
            &[],
        )
        .unwrap();
        (cert, key)
    }

    #[test]
    fn put_serialize_deserialize_get() -> Result<()> {
        let store = store();
        let (cert, key) = identity();

        let mut container = store.create("alias-1", "container-pw")?;
        store.put(&mut container, "alias-1", &cert, &key, "entry-pw")?;
        let bytes = store.serialize(&container)?;
        assert_eq!(&bytes[..4], MAGIC);

        let reopened = store.deserialize(&bytes, "container-pw")?;
        assert_eq!(reopened.alias(), "alias-1");
        let (cert2, key2) = store.get(&reopened, "alias-1", "entry-pw")?;
        assert_eq!(cert2.der_bytes(), cert.der_bytes());
        assert_eq!(key2.public_key_der()?, key.public_key_der()?);
        Ok(())
    }

    #[test]
    fn wrong_container_password() -> Result<()> {
        let store = store();
        let container = store.create("alias-1", "container-pw")?;
        let bytes = store.serialize(&container)?;
        assert!(matches!(
            store.deserialize(&bytes, "other"),
            Err(CertError::WrongPassword(_))
        ));
        Ok(())
    }

    #[test]
    fn wrong_entry_password_and_missing_alias() -> Result<()> {
        let store = store();
        let (cert, key) = identity();
        let mut container = store.create("alias-1", "container-pw")?;
        assert!(matches!(
            store.get(&container, "alias-1", "entry-pw"),
            Err(CertError::AliasNotFound)
        ));
        store.put(&mut container, "alias-1", &cert, &key, "entry-pw")?;
        assert!(matches!(
            store.get(&container, "alias-1", "nope"),
            Err(CertError::WrongPassword(_))
        ));
        assert!(matches!(
            store.get(&container, "alias-2", "entry-pw"),
            Err(CertError::AliasNotFound)
        ));
        Ok(())
    }

    #[test]
    fn remove_empties_the_slot() -> Result<()> {
        let store = store();
        let (cert, key) = identity();
        let mut container = store.create("alias-1", "container-pw")?;
        store.put(&mut container, "alias-1", &cert, &key, "entry-pw")?;
        store.remove(&mut container, "alias-1")?;
        assert!(container.is_empty());
        assert!(matches!(
            store.remove(&mut container, "alias-1"),
            Err(CertError::AliasNotFound)
        ));
        Ok(())
    }

    #[test]
    fn put_rejects_foreign_alias_and_mismatched_key() -> Result<()> {
        let store = store();
        let (cert, key) = identity();
        let (_, other_key) = identity();
        let mut container = store.create("alias-1", "container-pw")?;
        assert!(matches!(
            store.put(&mut container, "alias-2", &cert, &key, "entry-pw"),
            Err(CertError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.put(&mut container, "alias-1", &cert, &other_key, "entry-pw"),
            Err(CertError::KeyMismatch)
        ));
        Ok(())
    }

    #[test]
    fn tampered_or_foreign_bytes() -> Result<()> {
        let store = store();
        let container = store.create("alias-1", "container-pw")?;
        let mut bytes = store.serialize(&container)?;
        assert!(matches!(
            store.deserialize(b"garbage", "container-pw"),
            Err(CertError::MalformedInput(_))
        ));
        // iteration count is covered by the AAD
        bytes[HEADER_LEN - SALT_LEN - 1] ^= 0x01;
        assert!(store.deserialize(&bytes, "container-pw").is_err());
        Ok(())
    }

    #[test]
    fn locks_serialize_same_alias() {
        let locks = Arc::new(ContainerLocks::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let locks = locks.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    locks
                        .with_lock("shared", || {
                            counter.lock().unwrap().push(("enter", i));
                            thread::sleep(Duration::from_millis(10));
                            counter.lock().unwrap().push(("leave", i));
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let events = counter.lock().unwrap();
        for pair in events.chunks(2) {
            assert_eq!(pair[0].0, "enter");
            assert_eq!(pair[1].0, "leave");
            assert_eq!(pair[0].1, pair[1].1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[test]
    fn lock_is_released_on_error() {
        let locks = ContainerLocks::new();
        let failed: Result<()> =
            locks.with_lock("a", || Err(CertError::InternalFailure("boom".into())));
        assert!(failed.is_err());
        assert_eq!(locks.active(), 0);
        assert!(locks.with_lock("a", || Ok(1)).is_ok());
    }
}
