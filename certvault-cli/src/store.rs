//! JSON-file identity repository
//!
//! All records live in one `identities.json` file, rewritten atomically on
//! every change.

use certvault_keys::error::{CertError, Result};
use certvault_keys::repository::{check_unique, subject_contains};
use certvault_keys::{Identity, IdentityRepository, OwnerId};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

const IDENTITIES_FILE_NAME: &str = "identities.json";

pub struct JsonIdentityRepository {
    path: PathBuf,
    records: RwLock<Vec<Identity>>,
}

impl JsonIdentityRepository {
    pub fn open(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(IDENTITIES_FILE_NAME);
        let records = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                CertError::InvalidArgument(format!("Failed to parse {path:?}: {e}"))
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    fn persist(&self, records: &[Identity]) -> Result<()> {
        let content = serde_json::to_string_pretty(records)?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(content.as_bytes())?;
            f.flush()?;
            f.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    fn matching(&self, predicate: impl Fn(&Identity) -> bool) -> Vec<Identity> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.iter().filter(|i| predicate(i)).cloned().collect()
    }
}

impl IdentityRepository for JsonIdentityRepository {
    fn find(&self, owner: &OwnerId, certificate_id: &str) -> Result<Option<Identity>> {
        Ok(self
            .matching(|i| &i.owner == owner && i.certificate_id == certificate_id)
            .into_iter()
            .next())
    }

    fn find_by_certificate_id(&self, certificate_id: &str) -> Result<Option<Identity>> {
        Ok(self
            .matching(|i| i.certificate_id == certificate_id)
            .into_iter()
            .next())
    }

    fn find_all_by_owner(&self, owner: &OwnerId) -> Result<Vec<Identity>> {
        Ok(self.matching(|i| &i.owner == owner))
    }

    fn find_by_owner_and_subject_containing(
        &self,
        owner: &OwnerId,
        text: &str,
    ) -> Result<Vec<Identity>> {
        Ok(self.matching(|i| &i.owner == owner && subject_contains(i, text)))
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        check_unique(records.iter(), identity)?;
        let mut updated = records.clone();
        match updated.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => *existing = identity.clone(),
            None => updated.push(identity.clone()),
        }
        self.persist(&updated)?;
        *records = updated;
        Ok(())
    }

    fn delete(&self, identity: &Identity) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if !records.iter().any(|i| i.id == identity.id) {
            return Err(CertError::NotFound(format!("identity {}", identity.id)));
        }
        let updated: Vec<Identity> = records
            .iter()
            .filter(|i| i.id != identity.id)
            .cloned()
            .collect();
        self.persist(&updated)?;
        *records = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(owner: &str, subject: &str) -> Identity {
        let id = Uuid::new_v4();
        Identity {
            id,
            owner: OwnerId::new(owner).unwrap(),
            certificate_subject: subject.to_string(),
            certificate_id: format!("enc-{id}"),
            created_at: Utc::now(),
            container_locator: Identity::locator_for(&id),
            keystore_password: "ks".into(),
            private_key_password: "pk".into(),
        }
    }

    #[test]
    fn records_survive_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let alice = OwnerId::new("alice")?;
        let kept = record("alice", "kept.example.com");
        let dropped = record("alice", "dropped.example.com");
        {
            let repo = JsonIdentityRepository::open(dir.path())?;
            repo.save(&kept)?;
            repo.save(&dropped)?;
            repo.delete(&dropped)?;
        }

        let reopened = JsonIdentityRepository::open(dir.path())?;
        assert_eq!(reopened.find_all_by_owner(&alice)?, vec![kept.clone()]);
        assert_eq!(
            reopened.find_by_owner_and_subject_containing(&alice, "KEPT")?,
            vec![kept]
        );
        Ok(())
    }

    #[test]
    fn failed_persist_leaves_memory_unchanged() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = JsonIdentityRepository::open(&dir.path().join("missing"))?;
        assert!(repo.save(&record("alice", "a")).is_err());
        assert!(repo.find_all_by_owner(&OwnerId::new("alice")?)?.is_empty());
        Ok(())
    }
}
