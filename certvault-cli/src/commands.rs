//! Identity commands: generation, import, inspection, export and deletion

use anyhow::{anyhow, Context, Result};
use certvault_keys::{
    CertificateRequest, DownloadKind, KeyAlgorithm, SubjectAttributes, UploadedFile,
};
use std::path::{Path, PathBuf};

use crate::workspace::Workspace;

pub struct GenerateArgs {
    pub subject: SubjectAttributes,
    pub algorithm: Option<KeyAlgorithm>,
    pub key_size: Option<u32>,
    pub days: Option<u32>,
}

pub async fn generate(workspace: &Workspace, args: GenerateArgs) -> Result<()> {
    let defaults = &workspace.engine().config().defaults;
    let mut request = CertificateRequest::from_defaults(args.subject, defaults);
    if let Some(algorithm) = args.algorithm {
        let size = args.key_size.unwrap_or_else(|| algorithm.default_size());
        request = request.with_algorithm(algorithm, size);
    } else if let Some(size) = args.key_size {
        let algorithm = request.algorithm;
        request = request.with_algorithm(algorithm, size);
    }
    if let Some(days) = args.days {
        request = request.with_validity_days(days);
    }

    println!(
        "Generating {} {}-bit key for '{}'...",
        request.algorithm, request.key_size, request.subject.common_name
    );
    let identity = workspace
        .run(move |engine, owner| engine.generate_certificate(&request, owner))
        .await
        .context("Certificate generation failed")?;

    println!("Created identity {}", identity.certificate_id);
    Ok(())
}

pub async fn import(
    workspace: &Workspace,
    certificate: &Path,
    private_key: Option<&Path>,
    cert_password: Option<String>,
    key_password: Option<String>,
) -> Result<()> {
    let cert_file = read_upload(certificate)?;
    let identity = match private_key {
        Some(key_path) => {
            let key_file = read_upload(key_path)?;
            workspace
                .run(move |engine, owner| {
                    engine.upload_certificate(&cert_file, &key_file, owner, key_password.as_deref())
                })
                .await
        }
        None => {
            if cert_password.is_none() {
                return Err(anyhow!(
                    "Importing without --key expects a PKCS#12 bundle and --cert-password"
                ));
            }
            workspace
                .run(move |engine, owner| {
                    engine.import_certificate(
                        owner,
                        &cert_file.bytes,
                        &[],
                        cert_password.as_deref(),
                        None,
                    )
                })
                .await
        }
    }
    .context("Certificate import failed")?;

    println!(
        "Imported '{}' as identity {}",
        identity.certificate_subject, identity.certificate_id
    );
    Ok(())
}

fn read_upload(path: &Path) -> Result<UploadedFile> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {path:?}"))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(UploadedFile::new(file_name, bytes))
}

pub async fn list(workspace: &Workspace, query: Option<String>) -> Result<()> {
    let identities = workspace
        .run(move |engine, owner| engine.list_identities(owner, query.as_deref()))
        .await?;
    if identities.is_empty() {
        println!("No certificates found for {}", workspace.owner());
        return Ok(());
    }
    for identity in identities {
        println!(
            "{}  {}  {}",
            identity.certificate_id,
            identity.created_at.format("%Y-%m-%d %H:%M:%S"),
            identity.certificate_subject
        );
    }
    Ok(())
}

pub async fn show(workspace: &Workspace, certificate_id: String) -> Result<()> {
    let details = workspace
        .run(move |engine, owner| {
            let scoped = engine.resolve(owner, &certificate_id)?;
            engine.certificates_info(&scoped)
        })
        .await?;
    if details.is_empty() {
        return Err(anyhow!(
            "Certificate container could not be read; run with --verbose for details"
        ));
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&details).context("Failed to render details")?
    );
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum Export {
    Csr { pem: bool },
    PrivateKey { pem: bool },
    Certificate,
}

pub async fn export(
    workspace: &Workspace,
    certificate_id: String,
    what: Export,
    out_dir: PathBuf,
) -> Result<()> {
    let (identity, bytes, kind) = workspace
        .run(move |engine, owner| {
            let scoped = engine.resolve(owner, &certificate_id)?;
            let (bytes, kind) = match what {
                Export::Csr { pem } => {
                    let der = engine.generate_csr(&scoped)?;
                    let bytes = if pem {
                        certvault_keys::KeyMaterialCodec::csr_to_pem(&der)?
                    } else {
                        der
                    };
                    (bytes, DownloadKind::Csr)
                }
                Export::PrivateKey { pem } => (
                    engine.export_private_key(&scoped, Some(pem))?,
                    DownloadKind::PrivateKey,
                ),
                Export::Certificate => {
                    (engine.export_certificate(&scoped)?, DownloadKind::Certificate)
                }
            };
            Ok((scoped.identity().clone(), bytes, kind))
        })
        .await
        .context("Export failed")?;

    let path = workspace.write_download(&out_dir, &identity, kind, &bytes)?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub async fn export_pkcs12(
    workspace: &Workspace,
    certificate_id: String,
    password: String,
    out_dir: PathBuf,
) -> Result<()> {
    let (identity, bytes) = workspace
        .run(move |engine, owner| {
            let scoped = engine.resolve(owner, &certificate_id)?;
            let bytes = engine.export_pkcs12(&scoped, &password)?;
            Ok((scoped.identity().clone(), bytes))
        })
        .await
        .context("PKCS#12 export failed")?;

    let path = workspace.write_download(&out_dir, &identity, DownloadKind::Pkcs12, &bytes)?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub async fn delete(workspace: &Workspace, certificate_id: String) -> Result<()> {
    workspace
        .run(move |engine, owner| engine.delete_certificate(owner, &certificate_id))
        .await
        .context("Delete failed")?;
    println!("Deleted");
    Ok(())
}

pub async fn repair(workspace: &Workspace, certificate_id: String) -> Result<()> {
    workspace
        .run(move |engine, owner| engine.remove_orphaned_record(owner, &certificate_id))
        .await
        .context("Repair failed")?;
    println!("Removed orphaned record");
    Ok(())
}
