use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use crate::common::{GateError, Result};
use crate::core::capabilities::EnrolledTemplateStore;
use crate::core::sample::{has_magnitude, Embedding};

const STORAGE_VERSION: u32 = 1;
const MAX_USER_ID_LEN: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TemplateRecord {
    pub version: u32,
    pub user_id: String,
    pub embedding: Embedding,
    /// SHA-256 over the little-endian embedding values.
    pub digest: Vec<u8>,
    /// Unix seconds.
    pub enrolled_at: i64,
}

impl TemplateRecord {
    fn new(user_id: &str, embedding: &[f32]) -> Self {
        Self {
            version: STORAGE_VERSION,
            user_id: user_id.to_string(),
            embedding: embedding.to_vec(),
            digest: embedding_digest(embedding),
            enrolled_at: Utc::now().timestamp(),
        }
    }

    fn is_intact(&self) -> bool {
        embedding_digest(&self.embedding) == self.digest
    }
}

pub fn embedding_digest(embedding: &[f32]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for &value in embedding {
        hasher.update(value.to_le_bytes());
    }
    hasher.finalize().to_vec()
}

/// User ids become file names, so only a conservative character set passes.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    let valid = !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && !user_id.starts_with('.')
        && user_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(GateError::Storage(format!("Invalid user id: {:?}", user_id)));
    }
    Ok(())
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
        return Err(GateError::InvalidSample(
            "refusing to store an empty or non-finite template".into(),
        ));
    }
    if !has_magnitude(embedding) {
        return Err(GateError::InvalidSample("refusing to store a zero-magnitude template".into()));
    }
    Ok(())
}

/// One bincode file per enrolled user.
pub struct FileTemplateStore {
    data_dir: PathBuf,
}

impl FileTemplateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        tracing::debug!("Template store using {:?}", data_dir);
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn record_path(&self, user_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.bincode", user_id))
    }

    pub fn load_record(&self, user_id: &str) -> Result<TemplateRecord> {
        validate_user_id(user_id)?;
        let path = self.record_path(user_id);
        if !path.exists() {
            return Err(GateError::TemplateNotFound(user_id.to_string()));
        }

        let data = fs::read(&path)?;
        let mut record: TemplateRecord = bincode::deserialize(&data)
            .map_err(|e| GateError::Storage(format!("Failed to deserialize: {}", e)))?;

        if record.user_id != user_id {
            return Err(GateError::Storage(format!(
                "Template file for {} belongs to {}", user_id, record.user_id
            )));
        }
        if !record.is_intact() {
            tracing::warn!(user = user_id, "template digest mismatch");
            return Err(GateError::Storage(format!("Template for {} failed its integrity check", user_id)));
        }
        if record.version < STORAGE_VERSION {
            record.version = STORAGE_VERSION;
        }
        Ok(record)
    }

    pub fn remove(&self, user_id: &str) -> Result<bool> {
        validate_user_id(user_id)?;
        let path = self.record_path(user_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}

impl EnrolledTemplateStore for FileTemplateStore {
    fn fetch(&self, user_id: &str) -> Result<Embedding> {
        Ok(self.load_record(user_id)?.embedding)
    }

    fn store(&self, user_id: &str, embedding: &[f32]) -> Result<()> {
        validate_user_id(user_id)?;
        validate_embedding(embedding)?;

        let record = TemplateRecord::new(user_id, embedding);
        let encoded = bincode::serialize(&record)
            .map_err(|e| GateError::Storage(format!("Failed to serialize: {}", e)))?;

        // Write then rename so a crash never leaves a half-written template
        let path = self.record_path(user_id);
        let staging = path.with_extension("bincode.tmp");
        fs::write(&staging, encoded)?;
        fs::rename(&staging, &path)?;

        tracing::info!(user = user_id, dimension = embedding.len(), "template stored at {:?}", path);
        Ok(())
    }
}

/// Process-local store, for dry runs and tests.
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<String, Embedding>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}

impl EnrolledTemplateStore for MemoryTemplateStore {
    fn fetch(&self, user_id: &str) -> Result<Embedding> {
        self.templates
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| GateError::TemplateNotFound(user_id.to_string()))
    }

    fn store(&self, user_id: &str, embedding: &[f32]) -> Result<()> {
        validate_user_id(user_id)?;
        validate_embedding(embedding)?;
        self.templates.write().insert(user_id.to_string(), embedding.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stores_and_fetches_template() {
        let dir = TempDir::new().unwrap();
        let store = FileTemplateStore::new(dir.path()).unwrap();
        store.store("voter-001", &[0.25, -0.5, 1.0]).unwrap();

        assert_eq!(store.fetch("voter-001").unwrap(), vec![0.25, -0.5, 1.0]);
        let record = store.load_record("voter-001").unwrap();
        assert_eq!(record.version, STORAGE_VERSION);
        assert_eq!(record.digest.len(), 32);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileTemplateStore::new(dir.path()).unwrap();
        assert!(matches!(store.fetch("nobody"), Err(GateError::TemplateNotFound(_))));
    }

    #[test]
    fn path_like_user_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileTemplateStore::new(dir.path()).unwrap();
        for bad in ["", "../etc/passwd", "a/b", ".hidden", "name with space"] {
            assert!(store.store(bad, &[1.0]).is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn tampered_template_fails_integrity_check() {
        let dir = TempDir::new().unwrap();
        let store = FileTemplateStore::new(dir.path()).unwrap();
        store.store("alice", &[1.0, 2.0]).unwrap();

        let path = dir.path().join("alice.bincode");
        let mut record: TemplateRecord = bincode::deserialize(&fs::read(&path).unwrap()).unwrap();
        record.embedding[0] = 9.0;
        fs::write(&path, bincode::serialize(&record).unwrap()).unwrap();

        let err = store.fetch("alice").unwrap_err();
        assert!(err.to_string().contains("integrity"));
    }

    #[test]
    fn re_enrolment_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FileTemplateStore::new(dir.path()).unwrap();
        store.store("alice", &[1.0]).unwrap();
        store.store("alice", &[2.0]).unwrap();
        assert_eq!(store.fetch("alice").unwrap(), vec![2.0]);
        assert!(store.remove("alice").unwrap());
        assert!(!store.remove("alice").unwrap());
    }

    #[test]
    fn zero_templates_are_never_stored() {
        let dir = TempDir::new().unwrap();
        let file_store = FileTemplateStore::new(dir.path()).unwrap();
        let memory_store = MemoryTemplateStore::new();

        for store in [&file_store as &dyn EnrolledTemplateStore, &memory_store] {
            let err = store.store("carol", &[0.0, 0.0]).unwrap_err();
            assert!(err.to_string().contains("zero-magnitude"));
            assert!(matches!(store.fetch("carol"), Err(GateError::TemplateNotFound(_))));
        }
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTemplateStore::new();
        assert!(store.is_empty());
        store.store("bob", &[0.1, 0.2]).unwrap();
        assert_eq!(store.fetch("bob").unwrap(), vec![0.1, 0.2]);
        assert!(store.fetch("carol").is_err());
        assert!(store.store("bob", &[f32::NAN]).is_err());
    }
}
