//! Identity record persistence.
//!
//! The engine only sees the `IdentityRepository` trait; durable backends
//! live with the caller (the CLI keeps a JSON file). Certificate IDs passed
//! to the repository are always the encrypted form.

use crate::error::{CertError, Result};
use crate::identity::{Identity, OwnerId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

pub trait IdentityRepository: Send + Sync {
    fn find(&self, owner: &OwnerId, certificate_id: &str) -> Result<Option<Identity>>;
    /// Lookup across all owners
    fn find_by_certificate_id(&self, certificate_id: &str) -> Result<Option<Identity>>;
    fn find_all_by_owner(&self, owner: &OwnerId) -> Result<Vec<Identity>>;
    /// Case-insensitive substring match on the certificate subject
    fn find_by_owner_and_subject_containing(
        &self,
        owner: &OwnerId,
        text: &str,
    ) -> Result<Vec<Identity>>;
    fn save(&self, identity: &Identity) -> Result<()>;
    fn delete(&self, identity: &Identity) -> Result<()>;
}

/// Shared matching rules for repository implementations
pub fn subject_contains(identity: &Identity, text: &str) -> bool {
    identity
        .certificate_subject
        .to_lowercase()
        .contains(&text.to_lowercase())
}

/// Reject a save that would give two records the same certificate ID
pub fn check_unique<'a>(
    existing: impl IntoIterator<Item = &'a Identity>,
    identity: &Identity,
) -> Result<()> {
    let clash = existing
        .into_iter()
        .any(|other| other.id != identity.id && other.certificate_id == identity.certificate_id);
    if clash {
        return Err(CertError::InvalidArgument(
            "certificate id is already in use".into(),
        ));
    }
    Ok(())
}

fn sorted(mut identities: Vec<Identity>) -> Vec<Identity> {
    identities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    identities
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityRepository {
    records: RwLock<HashMap<Uuid, Identity>>,
}

impl InMemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityRepository for InMemoryIdentityRepository {
    fn find(&self, owner: &OwnerId, certificate_id: &str) -> Result<Option<Identity>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .values()
            .find(|i| &i.owner == owner && i.certificate_id == certificate_id)
            .cloned())
    }

    fn find_by_certificate_id(&self, certificate_id: &str) -> Result<Option<Identity>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .values()
            .find(|i| i.certificate_id == certificate_id)
            .cloned())
    }

    fn find_all_by_owner(&self, owner: &OwnerId) -> Result<Vec<Identity>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sorted(
            records.values().filter(|i| &i.owner == owner).cloned().collect(),
        ))
    }

    fn find_by_owner_and_subject_containing(
        &self,
        owner: &OwnerId,
        text: &str,
    ) -> Result<Vec<Identity>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sorted(
            records
                .values()
                .filter(|i| &i.owner == owner && subject_contains(i, text))
                .cloned()
                .collect(),
        ))
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        check_unique(records.values(), identity)?;
        records.insert(identity.id, identity.clone());
        Ok(())
    }

    fn delete(&self, identity: &Identity) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records
            .remove(&identity.id)
            .map(|_| ())
            .ok_or_else(|| CertError::NotFound(format!("identity {}", identity.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(owner: &str, subject: &str, certificate_id: &str) -> Identity {
        let id = Uuid::new_v4();
        Identity {
            id,
            owner: OwnerId::new(owner).unwrap(),
            certificate_subject: subject.to_string(),
            certificate_id: certificate_id.to_string(),
            created_at: Utc::now(),
            container_locator: Identity::locator_for(&id),
            keystore_password: "ks".into(),
            private_key_password: "pk".into(),
        }
    }

    #[test]
    fn find_is_owner_scoped() -> Result<()> {
        let repo = InMemoryIdentityRepository::new();
        let a = record("alice", "api.example.com", "enc-1");
        repo.save(&a)?;

        let alice = OwnerId::new("alice")?;
        let bob = OwnerId::new("bob")?;
        assert_eq!(repo.find(&alice, "enc-1")?, Some(a.clone()));
        assert_eq!(repo.find(&bob, "enc-1")?, None);
        assert_eq!(repo.find_by_certificate_id("enc-1")?, Some(a));
        Ok(())
    }

    #[test]
    fn subject_search_ignores_case() -> Result<()> {
        let repo = InMemoryIdentityRepository::new();
        repo.save(&record("alice", "API.example.com", "enc-1"))?;
        repo.save(&record("alice", "mail.example.com", "enc-2"))?;
        repo.save(&record("bob", "api.other.com", "enc-3"))?;

        let alice = OwnerId::new("alice")?;
        let hits = repo.find_by_owner_and_subject_containing(&alice, "api")?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].certificate_subject, "API.example.com");
        assert_eq!(repo.find_all_by_owner(&alice)?.len(), 2);
        Ok(())
    }

    #[test]
    fn duplicate_certificate_id_is_rejected() -> Result<()> {
        let repo = InMemoryIdentityRepository::new();
        repo.save(&record("alice", "a", "enc-1"))?;
        assert!(repo.save(&record("bob", "b", "enc-1")).is_err());
        Ok(())
    }

    #[test]
    fn delete_missing_is_not_found() -> Result<()> {
        let repo = InMemoryIdentityRepository::new();
        let a = record("alice", "a", "enc-1");
        repo.save(&a)?;
        repo.delete(&a)?;
        assert!(repo.is_empty());
        assert!(matches!(repo.delete(&a), Err(CertError::NotFound(_))));
        Ok(())
    }
}
