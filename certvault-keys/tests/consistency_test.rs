//! Failure injection and concurrency around the record/container pair

use certvault_common::{Component, Logger};
use certvault_keys::{
    error::{CertError, Result},
    CertificateEngine, CertificateRequest, ContainerStorage, EngineConfig, Identity,
    IdentityRepository, InMemoryIdentityRepository, KeyAlgorithm, MemoryContainerStorage,
    OwnerId, SubjectAttributes,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

/// Storage whose writes or removals can be switched off
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryContainerStorage,
    fail_writes: AtomicBool,
    fail_removals: AtomicBool,
}

impl ContainerStorage for FlakyStorage {
    fn write(&self, locator: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CertError::InternalFailure("disk full".into()));
        }
        self.inner.write(locator, bytes)
    }

    fn read(&self, locator: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read(locator)
    }

    fn remove(&self, locator: &str) -> Result<bool> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(CertError::InternalFailure("device busy".into()));
        }
        self.inner.remove(locator)
    }

    fn exists(&self, locator: &str) -> Result<bool> {
        self.inner.exists(locator)
    }
}

/// Storage whose removals take long enough for a second caller to queue up
#[derive(Default)]
struct SlowRemovalStorage {
    inner: MemoryContainerStorage,
}

impl ContainerStorage for SlowRemovalStorage {
    fn write(&self, locator: &str, bytes: &[u8]) -> Result<()> {
        self.inner.write(locator, bytes)
    }

    fn read(&self, locator: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read(locator)
    }

    fn remove(&self, locator: &str) -> Result<bool> {
        std::thread::sleep(Duration::from_millis(200));
        self.inner.remove(locator)
    }

    fn exists(&self, locator: &str) -> Result<bool> {
        self.inner.exists(locator)
    }
}

/// Repository whose saves can be switched off
#[derive(Default)]
struct FlakyRepository {
    inner: InMemoryIdentityRepository,
    fail_saves: AtomicBool,
}

impl IdentityRepository for FlakyRepository {
    fn find(&self, owner: &OwnerId, certificate_id: &str) -> Result<Option<Identity>> {
        self.inner.find(owner, certificate_id)
    }

    fn find_by_certificate_id(&self, certificate_id: &str) -> Result<Option<Identity>> {
        self.inner.find_by_certificate_id(certificate_id)
    }

    fn find_all_by_owner(&self, owner: &OwnerId) -> Result<Vec<Identity>> {
        self.inner.find_all_by_owner(owner)
    }

    fn find_by_owner_and_subject_containing(
        &self,
        owner: &OwnerId,
        text: &str,
    ) -> Result<Vec<Identity>> {
        self.inner.find_by_owner_and_subject_containing(owner, text)
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CertError::InternalFailure("connection reset".into()));
        }
        self.inner.save(identity)
    }

    fn delete(&self, identity: &Identity) -> Result<()> {
        self.inner.delete(identity)
    }
}

fn engine(
    repository: Arc<dyn IdentityRepository>,
    storage: Arc<dyn ContainerStorage>,
) -> Result<CertificateEngine> {
    let logger = Arc::new(Logger::new_root(Component::Engine, "consistency-test"));
    let config = EngineConfig::generate().with_kdf_iterations(1_000);
    CertificateEngine::new(config, repository, storage, logger)
}

fn request(cn: &str) -> CertificateRequest {
    CertificateRequest::from_defaults(SubjectAttributes::new(cn), &Default::default())
        .with_algorithm(KeyAlgorithm::EcdsaP256, 256)
}

#[test]
fn test_failed_record_save_leaves_nothing_behind() -> Result<()> {
    let repository = Arc::new(FlakyRepository::default());
    let storage = Arc::new(FlakyStorage::default());
    let engine = engine(repository.clone(), storage.clone())?;
    let alice = OwnerId::new("alice")?;

    repository.fail_saves.store(true, Ordering::SeqCst);
    let result = engine.generate_certificate(&request("a.test"), &alice);
    assert!(matches!(result, Err(CertError::InternalFailure(_))));
    assert!(engine.list_identities(&alice, None)?.is_empty());
    assert!(storage.inner.is_empty());
    Ok(())
}

#[test]
fn test_failed_container_write_saves_no_record() -> Result<()> {
    let repository = Arc::new(FlakyRepository::default());
    let storage = Arc::new(FlakyStorage::default());
    let engine = engine(repository.clone(), storage.clone())?;
    let alice = OwnerId::new("alice")?;

    storage.fail_writes.store(true, Ordering::SeqCst);
    assert!(engine.generate_certificate(&request("a.test"), &alice).is_err());
    assert!(repository.inner.is_empty());
    Ok(())
}

#[test]
fn test_failed_container_removal_keeps_record() -> Result<()> {
    let repository = Arc::new(FlakyRepository::default());
    let storage = Arc::new(FlakyStorage::default());
    let engine = engine(repository.clone(), storage.clone())?;
    let alice = OwnerId::new("alice")?;
    let identity = engine.generate_certificate(&request("keep.test"), &alice)?;

    storage.fail_removals.store(true, Ordering::SeqCst);
    let result = engine.delete_certificate(&alice, &identity.certificate_id);
    assert!(matches!(result, Err(CertError::InternalFailure(_))));

    // both halves are still usable
    let scoped = engine.resolve(&alice, &identity.certificate_id)?;
    assert!(!engine.export_certificate(&scoped)?.is_empty());

    storage.fail_removals.store(false, Ordering::SeqCst);
    engine.delete_certificate(&alice, &identity.certificate_id)?;
    assert!(repository.inner.is_empty());
    assert!(storage.inner.is_empty());
    Ok(())
}

#[test]
fn test_concurrent_generation_and_deletion() -> Result<()> {
    let repository = Arc::new(InMemoryIdentityRepository::new());
    let storage = Arc::new(MemoryContainerStorage::new());
    let engine = Arc::new(engine(repository.clone(), storage.clone())?);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            std::thread::spawn(move || -> Result<()> {
                let owner = OwnerId::new(format!("user-{}", i % 2))?;
                let identity = engine.generate_certificate(&request(&format!("n{i}.test")), &owner)?;
                let scoped = engine.resolve(&owner, &identity.certificate_id)?;
                engine.generate_csr(&scoped)?;
                if i % 4 == 0 {
                    engine.delete_certificate(&owner, &identity.certificate_id)?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    assert_eq!(repository.len(), 6);
    assert_eq!(storage.len(), 6);
    Ok(())
}

#[test]
fn test_racing_deletes_of_one_identity() -> Result<()> {
    let repository = Arc::new(InMemoryIdentityRepository::new());
    let storage = Arc::new(SlowRemovalStorage::default());
    let engine = Arc::new(engine(repository.clone(), storage.clone())?);
    let alice = OwnerId::new("alice")?;
    let identity = engine.generate_certificate(&request("race.test"), &alice)?;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let alice = alice.clone();
            let barrier = barrier.clone();
            let certificate_id = identity.certificate_id.clone();
            std::thread::spawn(move || {
                barrier.wait();
                engine.delete_certificate(&alice, &certificate_id)
            })
        })
        .collect();
    let results: Vec<Result<()>> = handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(CertError::NotFound(_))))
            .count(),
        1
    );
    assert!(repository.is_empty());
    assert!(storage.inner.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_same_identity_from_blocking_tasks() -> Result<()> {
    let repository = Arc::new(InMemoryIdentityRepository::new());
    let storage = Arc::new(MemoryContainerStorage::new());
    let engine = Arc::new(engine(repository.clone(), storage.clone())?);
    let alice = OwnerId::new("alice")?;
    let identity = engine.generate_certificate(&request("shared.test"), &alice)?;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let alice = alice.clone();
        let certificate_id = identity.certificate_id.clone();
        tasks.push(tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let scoped = engine.resolve(&alice, &certificate_id)?;
            engine.export_certificate(&scoped)
        }));
    }
    let mut exported = Vec::new();
    for task in tasks {
        exported.push(task.await.expect("task panicked")?);
    }
    assert!(exported.windows(2).all(|w| w[0] == w[1]));
    Ok(())
}
