//! Certvault CLI - certificate and keystore management
//!
//! Generates, imports, exports and deletes certificates for one owner at a
//! time. State lives in a config directory: `config.json` (cipher keys and
//! defaults), `identities.json` (records) and `containers/` (keystores).

use anyhow::{Context, Result};
use certvault_common::{Component, Logger};
use certvault_keys::{KeyAlgorithm, OwnerId, SubjectAttributes};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod init;
mod store;
mod workspace;

use commands::{Export, GenerateArgs};
use init::InitCommand;
use workspace::Workspace;

#[derive(Parser)]
#[command(name = "certvault")]
#[command(about = "Certvault CLI - Generate, import and export X.509 certificates")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration directory (default: ~/.certvault)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Owner whose certificates are managed (default: $USER)
    #[arg(short, long, global = true)]
    owner: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a configuration with fresh cipher keys
    #[command(name = "init")]
    Init {
        /// Force re-initialization even if config exists
        #[arg(short, long)]
        force: bool,

        /// PBKDF2 iterations for keystore containers
        #[arg(long)]
        kdf_iterations: Option<u32>,
    },
    /// Generate a key pair and self-signed certificate
    #[command(name = "generate")]
    Generate {
        /// Common name (CN)
        #[arg(long)]
        cn: String,
        /// Organization (O)
        #[arg(long)]
        organization: Option<String>,
        /// Organizational unit (OU)
        #[arg(long)]
        organizational_unit: Option<String>,
        /// Locality (L)
        #[arg(long)]
        locality: Option<String>,
        /// State or province (ST)
        #[arg(long)]
        state: Option<String>,
        /// Two-letter country code (C)
        #[arg(long)]
        country: Option<String>,
        /// Key algorithm: rsa or ecdsa-p256
        #[arg(short, long)]
        algorithm: Option<KeyAlgorithm>,
        /// Key size in bits
        #[arg(short, long)]
        key_size: Option<u32>,
        /// Validity in days
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Import a certificate with its private key, or a PKCS#12 bundle
    #[command(name = "import")]
    Import {
        /// Certificate file (PEM or DER), or PKCS#12 bundle without --key
        #[arg(long)]
        cert: PathBuf,
        /// Private key file (PEM or DER)
        #[arg(long)]
        key: Option<PathBuf>,
        /// PKCS#12 bundle password
        #[arg(long)]
        cert_password: Option<String>,
        /// Password of an encrypted private key
        #[arg(long)]
        key_password: Option<String>,
    },
    /// List certificates, optionally filtered by subject
    #[command(name = "list")]
    List {
        /// Case-insensitive subject filter
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Show certificate details
    #[command(name = "show")]
    Show { id: String },
    /// Write a certificate signing request for a stored key
    #[command(name = "csr")]
    Csr {
        id: String,
        /// PEM instead of DER
        #[arg(long)]
        pem: bool,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Write the private key (PKCS#8)
    #[command(name = "export-key")]
    ExportKey {
        id: String,
        /// PEM instead of DER
        #[arg(long)]
        pem: bool,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Write the certificate (DER)
    #[command(name = "export-cert")]
    ExportCert {
        id: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Write a password-protected PKCS#12 bundle
    #[command(name = "export-p12")]
    ExportP12 {
        id: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Delete a certificate and its keystore container
    #[command(name = "delete")]
    Delete { id: String },
    /// Drop a record whose keystore container is missing
    #[command(name = "repair")]
    Repair { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let logger = Arc::new(Logger::new_root(Component::CLI, "main"));

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .context("Could not determine home directory")?
            .join(".certvault"),
    };

    let command = match cli.command {
        Some(command) => command,
        None => {
            if config_dir.join("config.json").exists() {
                println!("Configuration found. Use 'certvault list' to see certificates.");
                println!("Use 'certvault init --force' to re-initialize.");
            } else {
                println!("No configuration found. Use 'certvault init' to get started.");
            }
            return Ok(());
        }
    };

    if let Commands::Init {
        force,
        kdf_iterations,
    } = command
    {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {config_dir:?}"))?;
        return InitCommand::new(config_dir, logger).run(force, kdf_iterations);
    }

    let owner_name = cli
        .owner
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "default".to_string());
    let owner = OwnerId::new(owner_name).context("Invalid owner")?;
    let logger = Arc::new(logger.with_owner(owner.as_str()));
    let workspace = Workspace::open(&config_dir, owner, logger)?;

    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Generate {
            cn,
            organization,
            organizational_unit,
            locality,
            state,
            country,
            algorithm,
            key_size,
            days,
        } => {
            let subject = SubjectAttributes {
                common_name: cn,
                organization,
                organizational_unit,
                locality,
                state,
                country,
            };
            commands::generate(
                &workspace,
                GenerateArgs {
                    subject,
                    algorithm,
                    key_size,
                    days,
                },
            )
            .await
        }
        Commands::Import {
            cert,
            key,
            cert_password,
            key_password,
        } => {
            commands::import(&workspace, &cert, key.as_deref(), cert_password, key_password)
                .await
        }
        Commands::List { query } => commands::list(&workspace, query).await,
        Commands::Show { id } => commands::show(&workspace, id).await,
        Commands::Csr { id, pem, out_dir } => {
            commands::export(&workspace, id, Export::Csr { pem }, out_dir).await
        }
        Commands::ExportKey { id, pem, out_dir } => {
            commands::export(&workspace, id, Export::PrivateKey { pem }, out_dir).await
        }
        Commands::ExportCert { id, out_dir } => {
            commands::export(&workspace, id, Export::Certificate, out_dir).await
        }
        Commands::ExportP12 {
            id,
            password,
            out_dir,
        } => commands::export_pkcs12(&workspace, id, password, out_dir).await,
        Commands::Delete { id } => commands::delete(&workspace, id).await,
        Commands::Repair { id } => commands::repair(&workspace, id).await,
    }
}
