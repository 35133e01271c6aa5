//! Engine configuration
//!
//! The configuration is constructed once at start-up (usually loaded from
//! `config.json` in a config directory) and handed to the cipher and the
//! engine. Nothing in this crate reads process-wide globals.

use crate::codec::{KeyAlgorithm, KeyUsage};
use crate::error::{CertError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.json";

/// Independent keys for the three secret purposes (base64 strings)
#[derive(Clone, Serialize, Deserialize)]
pub struct CipherConfig {
    pub keystore_password_key: String,
    pub private_key_password_key: String,
    pub certificate_id_key: String,
}

impl CipherConfig {
    /// Generate three fresh random 256-bit keys
    pub fn generate() -> Self {
        Self {
            keystore_password_key: random_key_b64(),
            private_key_password_key: random_key_b64(),
            certificate_id_key: random_key_b64(),
        }
    }
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("keystore_password_key", &"<redacted>")
            .field("private_key_password_key", &"<redacted>")
            .field("certificate_id_key", &"<redacted>")
            .finish()
    }
}

fn random_key_b64() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    STANDARD.encode(key)
}

/// Keystore container protection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreConfig {
    /// PBKDF2-HMAC-SHA256 iterations used to derive container keys
    pub kdf_iterations: u32,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: 100_000,
        }
    }
}

/// Defaults applied to generation requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub algorithm: KeyAlgorithm,
    pub key_size: u32,
    pub validity_days: u32,
    pub key_usages: Vec<KeyUsage>,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            key_size: 2048,
            validity_days: 365,
            key_usages: vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment],
        }
    }
}

/// Limits applied to uploaded certificate and key files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLimits {
    pub max_file_bytes: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 64 * 1024,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub cipher: CipherConfig,
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub defaults: GenerationDefaults,
    #[serde(default)]
    pub upload: UploadLimits,
    /// Directory holding serialized keystore containers
    pub storage_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Configuration with freshly generated cipher keys and default limits
    pub fn generate() -> Self {
        Self {
            cipher: CipherConfig::generate(),
            keystore: KeystoreConfig::default(),
            defaults: GenerationDefaults::default(),
            upload: UploadLimits::default(),
            storage_dir: None,
        }
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.keystore.kdf_iterations = iterations;
        self
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let keys = [
            ("keystore_password_key", &self.cipher.keystore_password_key),
            ("private_key_password_key", &self.cipher.private_key_password_key),
            ("certificate_id_key", &self.cipher.certificate_id_key),
        ];
        for (name, key) in keys {
            if key.trim().is_empty() {
                return Err(CertError::InvalidArgument(format!("{name} must not be empty")));
            }
        }
        if self.keystore.kdf_iterations == 0 {
            return Err(CertError::InvalidArgument(
                "kdf_iterations must be positive".to_string(),
            ));
        }
        if self.upload.max_file_bytes == 0 {
            return Err(CertError::InvalidArgument(
                "max_file_bytes must be positive".to_string(),
            ));
        }
        if self.defaults.validity_days == 0 {
            return Err(CertError::InvalidArgument(
                "validity_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from `config.json` in `config_dir`
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        if !config_file.exists() {
            return Err(CertError::NotFound(format!(
                "Configuration file not found: {config_file:?}"
            )));
        }
        let content = std::fs::read_to_string(&config_file)?;
        let config: EngineConfig = serde_json::from_str(&content).map_err(|e| {
            CertError::InvalidArgument(format!("Failed to parse config file {config_file:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `config.json` in `config_dir`
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_dir.join(CONFIG_FILE_NAME), content)?;
        Ok(())
    }

    pub fn exists(config_dir: &Path) -> bool {
        config_dir.join(CONFIG_FILE_NAME).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_independent() {
        let cfg = CipherConfig::generate();
        assert_ne!(cfg.keystore_password_key, cfg.certificate_id_key);
        assert_ne!(cfg.private_key_password_key, cfg.certificate_id_key);
    }

    #[test]
    fn debug_output_redacts_keys() {
        let cfg = CipherConfig::generate();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains(&cfg.certificate_id_key));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn validate_rejects_empty_key() {
        let mut cfg = EngineConfig::generate();
        cfg.cipher.private_key_password_key = String::new();
        assert!(matches!(cfg.validate(), Err(CertError::InvalidArgument(_))));
    }

    #[test]
    fn save_and_load_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(!EngineConfig::exists(dir.path()));

        let cfg = EngineConfig::generate().with_kdf_iterations(1_000);
        cfg.save(dir.path())?;
        assert!(EngineConfig::exists(dir.path()));

        let loaded = EngineConfig::load(dir.path())?;
        assert_eq!(loaded.cipher.certificate_id_key, cfg.cipher.certificate_id_key);
        assert_eq!(loaded.keystore.kdf_iterations, 1_000);
        assert_eq!(loaded.defaults.key_size, 2048);
        Ok(())
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            EngineConfig::load(dir.path()),
            Err(CertError::NotFound(_))
        ));
    }
}
