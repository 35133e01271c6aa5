//! Config directory initialization
//!
//! Creates `config.json` with fresh cipher keys and the container
//! directory. Re-initializing makes existing identities unreadable, so it
//! requires `--force`.

use anyhow::{Context, Result};
use certvault_common::{log_info, log_warn, Logger};
use certvault_keys::EngineConfig;
use std::path::PathBuf;
use std::sync::Arc;

use crate::workspace::container_dir;

pub struct InitCommand {
    config_dir: PathBuf,
    logger: Arc<Logger>,
}

impl InitCommand {
    pub fn new(config_dir: PathBuf, logger: Arc<Logger>) -> Self {
        Self { config_dir, logger }
    }

    pub fn run(&self, force: bool, kdf_iterations: Option<u32>) -> Result<()> {
        if EngineConfig::exists(&self.config_dir) && !force {
            println!("Configuration already exists in {:?}", self.config_dir);
            println!("Use --force to re-initialize. Existing identities will become unreadable.");
            return Ok(());
        }
        if force {
            log_warn!(
                self.logger,
                "Force flag specified - replacing cipher keys in {:?}",
                self.config_dir
            );
        }

        let mut config = EngineConfig::generate();
        if let Some(iterations) = kdf_iterations {
            config = config.with_kdf_iterations(iterations);
        }
        config.validate().context("Invalid configuration")?;

        let containers = container_dir(&self.config_dir, &config);
        std::fs::create_dir_all(&containers)
            .with_context(|| format!("Failed to create container directory {containers:?}"))?;
        config
            .save(&self.config_dir)
            .with_context(|| format!("Failed to write configuration to {:?}", self.config_dir))?;

        log_info!(self.logger, "Initialized config directory {:?}", self.config_dir);
        println!("Initialized {:?}", self.config_dir);
        println!("Containers are stored in {containers:?}");
        Ok(())
    }
}
