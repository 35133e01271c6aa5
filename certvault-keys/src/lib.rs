//! Certvault Keys - certificate and keystore lifecycle engine

pub mod cipher;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod repository;

pub use error::{CertError, Result};

pub use config::{CipherConfig, EngineConfig, GenerationDefaults, KeystoreConfig, UploadLimits};

pub use cipher::{CipherPolicy, SecretCipher, SecretPurpose};

pub use codec::{
    fingerprint, CertificateDetails, Encoding, KeyAlgorithm, KeyMaterialCodec, KeyPair, KeyUsage,
    SubjectAttributes, ToPem, ValidityPeriod, X509Certificate,
};

pub use keystore::{
    ContainerLocks, ContainerStorage, FileContainerStorage, KeystoreContainer, KeystoreStore,
    MemoryContainerStorage,
};

pub use identity::{
    CertificateRequest, DownloadKind, Identity, OwnerId, ScopedIdentity, UploadedFile,
};

pub use repository::{IdentityRepository, InMemoryIdentityRepository};

pub use engine::CertificateEngine;
