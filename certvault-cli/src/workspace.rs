//! Engine wiring for commands that operate on an initialized config directory

use anyhow::{anyhow, Context, Result};
use certvault_common::{log_info, Logger};
use certvault_keys::{
    CertificateEngine, DownloadKind, EngineConfig, FileContainerStorage, Identity, OwnerId,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::store::JsonIdentityRepository;

pub struct Workspace {
    engine: Arc<CertificateEngine>,
    owner: OwnerId,
    logger: Arc<Logger>,
}

impl Workspace {
    pub fn open(config_dir: &Path, owner: OwnerId, logger: Arc<Logger>) -> Result<Self> {
        if !EngineConfig::exists(config_dir) {
            return Err(anyhow!(
                "No configuration in {config_dir:?}. Run 'certvault init' first."
            ));
        }
        let config = EngineConfig::load(config_dir)
            .with_context(|| format!("Failed to load configuration from {config_dir:?}"))?;
        let storage_dir = container_dir(config_dir, &config);
        let storage = FileContainerStorage::new(&storage_dir)
            .with_context(|| format!("Failed to open container storage {storage_dir:?}"))?;
        let repository = JsonIdentityRepository::open(config_dir)
            .context("Failed to open identity repository")?;

        let engine = CertificateEngine::new(
            config,
            Arc::new(repository),
            Arc::new(storage),
            logger.clone(),
        )
        .context("Failed to create certificate engine")?;

        Ok(Self {
            engine: Arc::new(engine),
            owner,
            logger,
        })
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn engine(&self) -> &CertificateEngine {
        &self.engine
    }

    /// Run engine work on the blocking pool; key generation and PBKDF2 are CPU bound
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&CertificateEngine, &OwnerId) -> certvault_keys::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        let owner = self.owner.clone();
        let result = tokio::task::spawn_blocking(move || f(&engine, &owner))
            .await
            .context("Engine task failed")?;
        Ok(result?)
    }

    /// Write an exported artifact as `{subject}.{ext}` under `out_dir`
    pub fn write_download(
        &self,
        out_dir: &Path,
        identity: &Identity,
        kind: DownloadKind,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create output directory {out_dir:?}"))?;
        let path = out_dir.join(CertificateEngine::download_name(identity, kind));
        std::fs::write(&path, bytes).with_context(|| format!("Failed to write {path:?}"))?;
        log_info!(
            self.logger,
            "Wrote {} ({}, {} bytes)",
            path.display(),
            kind.content_type(),
            bytes.len()
        );
        Ok(path)
    }
}

pub fn container_dir(config_dir: &Path, config: &EngineConfig) -> PathBuf {
    config
        .storage_dir
        .clone()
        .unwrap_or_else(|| config_dir.join("containers"))
}
