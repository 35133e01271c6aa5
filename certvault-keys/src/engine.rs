//! Certificate Engine - identity lifecycle orchestration
//!
//! Generation, import, export and deletion of user-owned identities. Each
//! identity is one repository record plus one serialized keystore
//! container. Container-touching operations require a [`ScopedIdentity`],
//! which only [`CertificateEngine::resolve`] and
//! [`CertificateEngine::authorize`] hand out after checking ownership.

use crate::cipher::SecretCipher;
use crate::codec::{
    CertificateDetails, Encoding, KeyMaterialCodec, KeyPair, SubjectAttributes, ValidityPeriod,
    X509Certificate,
};
use crate::config::EngineConfig;
use crate::error::{CertError, Result};
use crate::identity::{
    CertificateRequest, DownloadKind, Identity, OwnerId, ScopedIdentity, UploadedFile,
};
use crate::keystore::{ContainerStorage, KeystoreContainer, KeystoreStore};
use crate::repository::IdentityRepository;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use certvault_common::{log_debug, log_error, log_info, log_op, log_warn, Component, Logger};
use chrono::Utc;
use rand::RngCore;
use std::sync::Arc;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Random container and entry passwords
const GENERATED_PASSWORD_BYTES: usize = 24;

pub struct CertificateEngine {
    config: EngineConfig,
    cipher: SecretCipher,
    keystore: KeystoreStore,
    repository: Arc<dyn IdentityRepository>,
    storage: Arc<dyn ContainerStorage>,
    logger: Arc<Logger>,
}

impl CertificateEngine {
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn IdentityRepository>,
        storage: Arc<dyn ContainerStorage>,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        config.validate()?;
        let cipher = SecretCipher::new(&config.cipher)?;
        let keystore = KeystoreStore::new(
            &config.keystore,
            Arc::new(logger.with_component(Component::Keystore)),
        )?;

        logger.info("Certificate engine initialized");

        Ok(Self {
            config,
            cipher,
            keystore,
            repository,
            storage,
            logger,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn scoped_logger(&self, owner: &OwnerId, operation: &str) -> Logger {
        self.logger
            .with_owner(owner.as_str())
            .with_operation(operation)
    }

    /* ---------------------------------------------------------------------
     * Creation
     * ------------------------------------------------------------------ */

    /// Generate a key pair and self-signed certificate and store them as a new identity
    pub fn generate_certificate(
        &self,
        request: &CertificateRequest,
        owner: &OwnerId,
    ) -> Result<Identity> {
        let logger = self.scoped_logger(owner, "generate");
        request.validate()?;
        let validity = ValidityPeriod::days_from_now(request.validity_days)?;

        log_debug!(
            logger,
            "Generating {} {}-bit key pair",
            request.algorithm,
            request.key_size
        );
        let key_pair = KeyMaterialCodec::generate_key_pair(request.algorithm, request.key_size)?;
        let certificate = KeyMaterialCodec::build_self_signed_certificate(
            &key_pair,
            &request.subject,
            &validity,
            &request.key_usages,
        )?;

        self.persist_new(
            owner,
            &request.subject.common_name,
            &certificate,
            &key_pair,
            &logger,
        )
    }

    /// Store an externally issued certificate with its private key.
    ///
    /// With empty `key_bytes`, `cert_bytes` is read as a PKCS#12 bundle
    /// opened with `cert_password`.
    pub fn import_certificate(
        &self,
        owner: &OwnerId,
        cert_bytes: &[u8],
        key_bytes: &[u8],
        cert_password: Option<&str>,
        key_password: Option<&str>,
    ) -> Result<Identity> {
        let logger = self.scoped_logger(owner, "import");
        if cert_bytes.is_empty() {
            return Err(CertError::InvalidArgument("certificate is empty".into()));
        }

        let (certificate, key_pair) = if key_bytes.is_empty() {
            let password = cert_password.ok_or_else(|| {
                CertError::InvalidArgument(
                    "a private key or a PKCS#12 password is required".into(),
                )
            })?;
            KeyMaterialCodec::parse_pkcs12(cert_bytes, password)?
        } else {
            let certificate =
                KeyMaterialCodec::parse_certificate(cert_bytes, Encoding::detect(cert_bytes))?;
            let key_pair = KeyMaterialCodec::parse_private_key(
                key_bytes,
                Encoding::detect(key_bytes),
                key_password,
            )?;
            (certificate, key_pair)
        };

        if !certificate.matches_key(&key_pair)? {
            logger.warn("Imported private key does not match the certificate");
            return Err(CertError::KeyMismatch);
        }

        let subject = SubjectAttributes::from_certificate(&certificate)
            .map(|s| s.common_name)
            .unwrap_or_else(|_| certificate.subject().to_string());
        self.persist_new(owner, &subject, &certificate, &key_pair, &logger)
    }

    /// Import from uploaded files after size and emptiness checks
    pub fn upload_certificate(
        &self,
        certificate: &UploadedFile,
        private_key: &UploadedFile,
        owner: &OwnerId,
        key_password: Option<&str>,
    ) -> Result<Identity> {
        let limit = self.config.upload.max_file_bytes;
        for file in [certificate, private_key] {
            if file.bytes.is_empty() {
                return Err(CertError::InvalidArgument(format!(
                    "uploaded file '{}' is empty",
                    file.file_name
                )));
            }
            if file.bytes.len() > limit {
                return Err(CertError::InvalidArgument(format!(
                    "uploaded file '{}' exceeds {limit} bytes",
                    file.file_name
                )));
            }
        }
        self.import_certificate(owner, &certificate.bytes, &private_key.bytes, None, key_password)
    }

    /// Container first, record second; a failed record save removes the container
    fn persist_new(
        &self,
        owner: &OwnerId,
        subject: &str,
        certificate: &X509Certificate,
        key_pair: &KeyPair,
        logger: &Logger,
    ) -> Result<Identity> {
        let certificate_id = Zeroizing::new(Uuid::new_v4().to_string());
        let keystore_password = random_password();
        let private_key_password = random_password();

        let id = Uuid::new_v4();
        let identity = Identity {
            id,
            owner: owner.clone(),
            certificate_subject: subject.to_string(),
            certificate_id: self.cipher.encrypt_certificate_id(&certificate_id)?,
            created_at: Utc::now(),
            container_locator: Identity::locator_for(&id),
            keystore_password: self.cipher.encrypt_keystore_password(&keystore_password)?,
            private_key_password: self
                .cipher
                .encrypt_private_key_password(&private_key_password)?,
        };

        self.keystore.with_lock(&certificate_id, || {
            let mut container = self.keystore.create(&certificate_id, &keystore_password)?;
            self.keystore.put(
                &mut container,
                &certificate_id,
                certificate,
                key_pair,
                &private_key_password,
            )?;
            let blob = self.keystore.serialize(&container)?;
            self.storage.write(&identity.container_locator, &blob)?;

            if let Err(e) = self.repository.save(&identity) {
                log_error!(logger, "Saving identity {} failed: {e}", identity.id);
                match self.storage.remove(&identity.container_locator) {
                    Ok(_) => log_info!(logger, "Rolled back container for {}", identity.id),
                    Err(rollback) => log_error!(
                        logger,
                        "Rollback of container {} failed: {rollback}",
                        identity.container_locator
                    ),
                }
                return Err(e);
            }
            Ok(())
        })?;

        log_info!(
            logger,
            "Stored identity {} for subject '{}'",
            identity.id,
            identity.certificate_subject
        );
        Ok(identity)
    }

    /* ---------------------------------------------------------------------
     * Resolution
     * ------------------------------------------------------------------ */

    /// Owner-scoped lookup by external certificate ID.
    ///
    /// The external ID is the encrypted form stored in
    /// [`Identity::certificate_id`]; the plaintext never leaves the engine.
    pub fn resolve(&self, owner: &OwnerId, certificate_id: &str) -> Result<ScopedIdentity> {
        if certificate_id.trim().is_empty() {
            return Err(CertError::InvalidArgument(
                "certificate id must not be empty".into(),
            ));
        }
        match self.repository.find(owner, certificate_id)? {
            Some(identity) => {
                let alias = self.cipher.decrypt_certificate_id(&identity.certificate_id)?;
                Ok(ScopedIdentity::new(identity, alias))
            }
            None => {
                if self
                    .repository
                    .find_by_certificate_id(certificate_id)?
                    .is_some()
                {
                    log_op!(self.logger, owner.as_str(), "resolve"; warn,
                        "Rejected access to an identity of another owner");
                    Err(CertError::AccessDenied)
                } else {
                    Err(CertError::NotFound("no identity for certificate id".into()))
                }
            }
        }
    }

    /// Check that `identity` belongs to `owner` and still exists
    pub fn authorize(&self, identity: &Identity, owner: &OwnerId) -> Result<ScopedIdentity> {
        if &identity.owner != owner {
            log_op!(self.logger, owner.as_str(), "authorize"; warn,
                "Rejected access to identity {}", identity.id);
            return Err(CertError::AccessDenied);
        }
        let current = self
            .repository
            .find(owner, &identity.certificate_id)?
            .ok_or_else(|| CertError::NotFound(format!("identity {}", identity.id)))?;
        let alias = self.cipher.decrypt_certificate_id(&current.certificate_id)?;
        Ok(ScopedIdentity::new(current, alias))
    }

    /// All identities of `owner`, optionally filtered by subject text
    pub fn list_identities(&self, owner: &OwnerId, query: Option<&str>) -> Result<Vec<Identity>> {
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(text) => self
                .repository
                .find_by_owner_and_subject_containing(owner, text),
            None => self.repository.find_all_by_owner(owner),
        }
    }

    /* ---------------------------------------------------------------------
     * Container access
     * ------------------------------------------------------------------ */

    // Callers hold the alias lock; a concurrent delete may have won the race
    fn ensure_record(&self, identity: &Identity) -> Result<()> {
        match self
            .repository
            .find(&identity.owner, &identity.certificate_id)?
        {
            Some(_) => Ok(()),
            None => Err(CertError::NotFound(format!("identity {}", identity.id))),
        }
    }

    fn open_container(&self, scoped: &ScopedIdentity) -> Result<KeystoreContainer> {
        let identity = scoped.identity();
        let blob = self
            .storage
            .read(&identity.container_locator)?
            .ok_or_else(|| {
                CertError::Inconsistent(format!(
                    "identity {} has no keystore container",
                    identity.id
                ))
            })?;
        let password = Zeroizing::new(
            self.cipher
                .decrypt_keystore_password(&identity.keystore_password)?,
        );
        self.keystore.deserialize(&blob, &password)
    }

    /// Run `f` under the container lock after confirming the record still exists
    fn with_container<R>(
        &self,
        scoped: &ScopedIdentity,
        f: impl FnOnce(&KeystoreContainer) -> Result<R>,
    ) -> Result<R> {
        self.keystore.with_lock(scoped.alias(), || {
            self.ensure_record(scoped.identity())?;
            let container = self.open_container(scoped)?;
            f(&container)
        })
    }

    /// Lend the stored certificate and key pair to `f`; the key is dropped when it returns
    pub fn with_key_pair<R>(
        &self,
        scoped: &ScopedIdentity,
        f: impl FnOnce(&X509Certificate, &KeyPair) -> Result<R>,
    ) -> Result<R> {
        self.with_container(scoped, |container| {
            let password = Zeroizing::new(
                self.cipher
                    .decrypt_private_key_password(&scoped.identity().private_key_password)?,
            );
            let (certificate, key_pair) =
                self.keystore
                    .get(container, scoped.alias(), &password)?;
            f(&certificate, &key_pair)
        })
    }

    /* ---------------------------------------------------------------------
     * Export
     * ------------------------------------------------------------------ */

    /// PKCS#10 request over the stored key, subject taken from the stored certificate
    pub fn generate_csr(&self, scoped: &ScopedIdentity) -> Result<Vec<u8>> {
        let csr = self.with_key_pair(scoped, |certificate, key_pair| {
            let subject = SubjectAttributes::from_certificate(certificate)?;
            KeyMaterialCodec::build_csr(key_pair, &subject)
        })?;
        log_op!(self.logger, scoped.owner().as_str(), "csr"; info,
            "Issued CSR for identity {}", scoped.identity().id);
        Ok(csr)
    }

    /// PKCS#8 private key; DER unless `as_pem` is `Some(true)`
    pub fn export_private_key(
        &self,
        scoped: &ScopedIdentity,
        as_pem: Option<bool>,
    ) -> Result<Vec<u8>> {
        let bytes = self.with_key_pair(scoped, |_, key_pair| {
            if as_pem.unwrap_or(false) {
                KeyMaterialCodec::to_pem(key_pair)
            } else {
                key_pair.private_key_der()
            }
        })?;
        log_op!(self.logger, scoped.owner().as_str(), "export-key"; info,
            "Exported private key of identity {}", scoped.identity().id);
        Ok(bytes)
    }

    /// Stored certificate, DER encoded
    pub fn export_certificate(&self, scoped: &ScopedIdentity) -> Result<Vec<u8>> {
        self.with_container(scoped, |container| {
            let certificate = self.keystore.get_certificate(container, scoped.alias())?;
            Ok(certificate.der_bytes().to_vec())
        })
    }

    /// Certificate and key as a PKCS#12 bundle protected by `password`
    pub fn export_pkcs12(&self, scoped: &ScopedIdentity, password: &str) -> Result<Vec<u8>> {
        let friendly_name = scoped.identity().certificate_subject.clone();
        self.with_key_pair(scoped, |certificate, key_pair| {
            KeyMaterialCodec::to_pkcs12(certificate, key_pair, &friendly_name, password)
        })
    }

    /// Display metadata; empty when the container cannot be decoded
    pub fn certificates_info(&self, scoped: &ScopedIdentity) -> Result<Vec<CertificateDetails>> {
        let result = self.with_container(scoped, |container| {
            let certificate = self.keystore.get_certificate(container, scoped.alias())?;
            KeyMaterialCodec::extract_metadata(&certificate)
        });
        match result {
            Ok(details) => Ok(vec![details]),
            Err(CertError::NotFound(msg)) => Err(CertError::NotFound(msg)),
            Err(e) => {
                log_op!(self.logger, scoped.owner().as_str(), "info"; warn,
                    "Keystore container of identity {} is unreadable: {e}",
                    scoped.identity().id);
                Ok(Vec::new())
            }
        }
    }

    /// Attachment file name: `{subject}.{csr|key|cer|p12}`
    pub fn download_name(identity: &Identity, kind: DownloadKind) -> String {
        let stem: String = identity
            .certificate_subject
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let stem = stem.trim_matches('.');
        let stem = if stem.is_empty() { "certificate" } else { stem };
        format!("{stem}.{}", kind.extension())
    }

    /* ---------------------------------------------------------------------
     * Deletion
     * ------------------------------------------------------------------ */

    /// Remove the container, then the record.
    ///
    /// A container that cannot be removed leaves the record in place.
    pub fn delete_certificate(&self, owner: &OwnerId, certificate_id: &str) -> Result<()> {
        let logger = self.scoped_logger(owner, "delete");
        let scoped = self.resolve(owner, certificate_id)?;
        let identity = scoped.identity();

        self.keystore.with_lock(scoped.alias(), || {
            self.ensure_record(identity)?;
            match self.storage.remove(&identity.container_locator) {
                Ok(true) => {}
                Ok(false) => {
                    log_warn!(
                        logger,
                        "Identity {} has no keystore container; record kept",
                        identity.id
                    );
                    return Err(CertError::Inconsistent(format!(
                        "identity {} has no keystore container",
                        identity.id
                    )));
                }
                Err(e) => {
                    log_error!(
                        logger,
                        "Removing container of identity {} failed: {e}",
                        identity.id
                    );
                    return Err(CertError::InternalFailure(format!(
                        "keystore container removal failed: {e}"
                    )));
                }
            }

            self.repository.delete(identity).map_err(|e| {
                log_error!(
                    logger,
                    "Container of identity {} removed but record deletion failed: {e}",
                    identity.id
                );
                CertError::Inconsistent(format!(
                    "record {} outlived its keystore container: {e}",
                    identity.id
                ))
            })
        })?;

        log_info!(logger, "Deleted identity {}", identity.id);
        Ok(())
    }

    /// Maintenance: drop a record whose keystore container is already gone
    pub fn remove_orphaned_record(&self, owner: &OwnerId, certificate_id: &str) -> Result<()> {
        let logger = self.scoped_logger(owner, "repair");
        let scoped = self.resolve(owner, certificate_id)?;
        let identity = scoped.identity();

        self.keystore.with_lock(scoped.alias(), || {
            self.ensure_record(identity)?;
            if self.storage.exists(&identity.container_locator)? {
                return Err(CertError::InvalidArgument(format!(
                    "identity {} still has its keystore container",
                    identity.id
                )));
            }
            self.repository.delete(identity)
        })?;

        log_warn!(logger, "Removed orphaned record {}", identity.id);
        Ok(())
    }
}

fn random_password() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; GENERATED_PASSWORD_BYTES]);
    rand::thread_rng().fill_bytes(&mut bytes[..]);
    Zeroizing::new(URL_SAFE_NO_PAD.encode(&bytes[..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::KeyAlgorithm;
    use crate::keystore::MemoryContainerStorage;
    use crate::repository::InMemoryIdentityRepository;

    struct Fixture {
        engine: CertificateEngine,
        repository: Arc<InMemoryIdentityRepository>,
        storage: Arc<MemoryContainerStorage>,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(InMemoryIdentityRepository::new());
        let storage = Arc::new(MemoryContainerStorage::new());
        let logger = Arc::new(Logger::new_root(Component::Engine, "engine-test"));
        let config = EngineConfig::generate().with_kdf_iterations(1_000);
        let engine =
            CertificateEngine::new(config, repository.clone(), storage.clone(), logger).unwrap();
        Fixture {
            engine,
            repository,
            storage,
        }
    }

    fn ec_request(cn: &str) -> CertificateRequest {
        CertificateRequest::from_defaults(
            SubjectAttributes::new(cn),
            &crate::config::GenerationDefaults::default(),
        )
        .with_algorithm(KeyAlgorithm::EcdsaP256, 256)
    }

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name).unwrap()
    }

    #[test]
    fn generated_identity_stores_only_ciphertext() -> Result<()> {
        let f = fixture();
        let identity = f.engine.generate_certificate(&ec_request("svc.test"), &owner("alice"))?;

        assert_eq!(identity.certificate_subject, "svc.test");
        assert!(Uuid::parse_str(&identity.certificate_id).is_err());
        assert_ne!(identity.keystore_password, identity.private_key_password);
        assert!(f.storage.exists(&identity.container_locator)?);
        assert_eq!(f.repository.len(), 1);
        Ok(())
    }

    #[test]
    fn resolve_and_authorize_agree() -> Result<()> {
        let f = fixture();
        let alice = owner("alice");
        let identity = f.engine.generate_certificate(&ec_request("svc.test"), &alice)?;

        let scoped = f.engine.authorize(&identity, &alice)?;
        let again = f.engine.resolve(&alice, &identity.certificate_id)?;
        assert_eq!(again.identity(), &identity);
        assert_eq!(again.alias(), scoped.alias());
        assert!(Uuid::parse_str(again.alias()).is_ok());
        Ok(())
    }

    #[test]
    fn foreign_owner_is_denied_before_lookup() -> Result<()> {
        let f = fixture();
        let identity = f.engine.generate_certificate(&ec_request("svc.test"), &owner("alice"))?;

        assert!(matches!(
            f.engine.authorize(&identity, &owner("bob")),
            Err(CertError::AccessDenied)
        ));
        assert!(matches!(
            f.engine.resolve(&owner("bob"), &identity.certificate_id),
            Err(CertError::AccessDenied)
        ));
        assert!(matches!(
            f.engine.resolve(&owner("alice"), "no-such-id"),
            Err(CertError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn private_key_export_defaults_to_der() -> Result<()> {
        let f = fixture();
        let alice = owner("alice");
        let identity = f.engine.generate_certificate(&ec_request("svc.test"), &alice)?;
        let scoped = f.engine.authorize(&identity, &alice)?;

        let der = f.engine.export_private_key(&scoped, None)?;
        assert_eq!(Encoding::detect(&der), Encoding::Der);
        let pem = f.engine.export_private_key(&scoped, Some(true))?;
        assert!(String::from_utf8_lossy(&pem).contains("BEGIN PRIVATE KEY"));
        Ok(())
    }

    #[test]
    fn unreadable_container_yields_empty_info() -> Result<()> {
        let f = fixture();
        let alice = owner("alice");
        let identity = f.engine.generate_certificate(&ec_request("svc.test"), &alice)?;
        let scoped = f.engine.authorize(&identity, &alice)?;

        assert_eq!(f.engine.certificates_info(&scoped)?.len(), 1);
        f.storage.write(&identity.container_locator, b"not a container")?;
        assert!(f.engine.certificates_info(&scoped)?.is_empty());
        Ok(())
    }

    #[test]
    fn missing_container_blocks_delete_until_repaired() -> Result<()> {
        let f = fixture();
        let alice = owner("alice");
        let identity = f.engine.generate_certificate(&ec_request("svc.test"), &alice)?;
        let external_id = identity.certificate_id.clone();

        f.storage.remove(&identity.container_locator)?;
        assert!(matches!(
            f.engine.delete_certificate(&alice, &external_id),
            Err(CertError::Inconsistent(_))
        ));
        assert_eq!(f.repository.len(), 1);

        f.engine.remove_orphaned_record(&alice, &external_id)?;
        assert!(f.repository.is_empty());
        Ok(())
    }

    #[test]
    fn repair_refuses_healthy_identity() -> Result<()> {
        let f = fixture();
        let alice = owner("alice");
        let identity = f.engine.generate_certificate(&ec_request("svc.test"), &alice)?;
        let external_id = identity.certificate_id.clone();
        assert!(f.engine.remove_orphaned_record(&alice, &external_id).is_err());
        assert_eq!(f.repository.len(), 1);
        Ok(())
    }

    #[test]
    fn upload_limits() -> Result<()> {
        let f = fixture();
        let alice = owner("alice");
        let empty = UploadedFile::new("cert.pem", Vec::new());
        let key = UploadedFile::new("key.pem", b"x".to_vec());
        assert!(matches!(
            f.engine.upload_certificate(&empty, &key, &alice, None),
            Err(CertError::InvalidArgument(_))
        ));

        let huge = UploadedFile::new("cert.pem", vec![b'a'; f.engine.config().upload.max_file_bytes + 1]);
        assert!(matches!(
            f.engine.upload_certificate(&huge, &key, &alice, None),
            Err(CertError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn download_names() {
        let id = Uuid::new_v4();
        let mut identity = Identity {
            id,
            owner: owner("alice"),
            certificate_subject: "api.example.com".into(),
            certificate_id: String::new(),
            created_at: Utc::now(),
            container_locator: Identity::locator_for(&id),
            keystore_password: String::new(),
            private_key_password: String::new(),
        };
        assert_eq!(
            CertificateEngine::download_name(&identity, DownloadKind::Csr),
            "api.example.com.csr"
        );
        identity.certificate_subject = "../a b".into();
        assert_eq!(
            CertificateEngine::download_name(&identity, DownloadKind::Certificate),
            "_a_b.cer"
        );
        identity.certificate_subject = String::new();
        assert_eq!(
            CertificateEngine::download_name(&identity, DownloadKind::Pkcs12),
            "certificate.p12"
        );
    }
}
