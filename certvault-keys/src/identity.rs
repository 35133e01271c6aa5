use crate::codec::{KeyAlgorithm, KeyUsage, SubjectAttributes};
use crate::config::GenerationDefaults;
use crate::error::{CertError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Stable identifier of the user owning identities
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CertError::InvalidArgument("owner must not be empty".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted record of one user-owned certificate and private key.
///
/// `certificate_id`, `keystore_password` and `private_key_password` hold
/// ciphertext only. `container_locator` addresses the serialized keystore
/// container and is derived from `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub owner: OwnerId,
    pub certificate_subject: String,
    pub certificate_id: String,
    pub created_at: DateTime<Utc>,
    pub container_locator: String,
    pub keystore_password: String,
    pub private_key_password: String,
}

impl Identity {
    pub fn locator_for(id: &Uuid) -> String {
        format!("{id}.cvks")
    }
}

/// An identity whose ownership has been checked.
///
/// Only the engine hands these out, so holding one proves the check ran.
pub struct ScopedIdentity {
    identity: Identity,
    alias: Zeroizing<String>,
}

impl ScopedIdentity {
    pub(crate) fn new(identity: Identity, alias: String) -> Self {
        Self {
            identity,
            alias: Zeroizing::new(alias),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn owner(&self) -> &OwnerId {
        &self.identity.owner
    }

    /// Plaintext external certificate ID, also the in-container alias
    pub(crate) fn alias(&self) -> &str {
        &self.alias
    }
}

impl fmt::Debug for ScopedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedIdentity")
            .field("id", &self.identity.id)
            .field("owner", &self.identity.owner)
            .field("subject", &self.identity.certificate_subject)
            .finish()
    }
}

/// Parameters for generating a self-signed identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub subject: SubjectAttributes,
    pub algorithm: KeyAlgorithm,
    pub key_size: u32,
    pub validity_days: u32,
    pub key_usages: Vec<KeyUsage>,
}

impl CertificateRequest {
    pub fn from_defaults(subject: SubjectAttributes, defaults: &GenerationDefaults) -> Self {
        Self {
            subject,
            algorithm: defaults.algorithm,
            key_size: defaults.key_size,
            validity_days: defaults.validity_days,
            key_usages: defaults.key_usages.clone(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: KeyAlgorithm, key_size: u32) -> Self {
        self.algorithm = algorithm;
        self.key_size = key_size;
        self
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub fn with_key_usages(mut self, key_usages: Vec<KeyUsage>) -> Self {
        self.key_usages = key_usages;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.subject.validate()?;
        if self.validity_days == 0 {
            return Err(CertError::InvalidArgument(
                "validity must be at least one day".into(),
            ));
        }
        if !self.algorithm.supported_sizes().contains(&self.key_size) {
            return Err(CertError::UnsupportedAlgorithm(format!(
                "{} with key size {}",
                self.algorithm, self.key_size
            )));
        }
        Ok(())
    }
}

/// Raw bytes handed over by an upload collaborator
#[derive(Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Kinds of downloadable artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Csr,
    PrivateKey,
    Certificate,
    Pkcs12,
}

impl DownloadKind {
    pub fn extension(&self) -> &'static str {
        match self {
            DownloadKind::Csr => "csr",
            DownloadKind::PrivateKey => "key",
            DownloadKind::Certificate => "cer",
            DownloadKind::Pkcs12 => "p12",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DownloadKind::Csr => "application/pkcs10",
            DownloadKind::PrivateKey => "application/pkcs8",
            DownloadKind::Certificate => "application/pkix-cert",
            DownloadKind::Pkcs12 => "application/x-pkcs12",
        }
    }
}
