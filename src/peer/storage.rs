use crate::core::error::StorageError;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Local resource storage used by the transfer server and the orchestrator.
///
/// Calls are blocking; async callers go through `spawn_blocking`.
pub trait ResourceStore: Send + Sync {
    fn list_local_resource_names(&self) -> BTreeSet<String>;

    fn exists(&self, name: &str) -> bool;

    fn read_bytes(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// A name is usable on the wire and on disk only if it is a single plain
/// path component without whitespace.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\'])
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Directory-backed store: serves from the shared dir and the download dir,
/// writes into the download dir.
pub struct FsStore {
    shared_dir: PathBuf,
    download_dir: PathBuf,
}

impl FsStore {
    pub fn new(shared_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            shared_dir: shared_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        if !is_valid_name(name) {
            return None;
        }
        [&self.shared_dir, &self.download_dir]
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }

    fn scan(dir: &Path, names: &mut BTreeSet<String>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to list resource directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if is_valid_name(&name) => {
                    names.insert(name);
                }
                Ok(name) => debug!(name = %name, "Skipping file with unshareable name"),
                Err(raw) => debug!(name = ?raw, "Skipping file with non UTF-8 name"),
            }
        }
    }
}

impl ResourceStore for FsStore {
    fn list_local_resource_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        Self::scan(&self.shared_dir, &mut names);
        Self::scan(&self.download_dir, &mut names);
        names
    }

    fn exists(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }

    fn read_bytes(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        if !is_valid_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        let path = self
            .locate(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if !is_valid_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        fs::create_dir_all(&self.download_dir)?;
        fs::write(self.download_dir.join(name), bytes)?;
        Ok(())
    }
}

/// Store that keeps resources in memory.
#[derive(Default)]
pub struct InMemoryStore {
    resources: DashMap<String, Vec<u8>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(self, name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(name.to_string(), bytes.into());
        self
    }
}

impl ResourceStore for InMemoryStore {
    fn list_local_resource_names(&self) -> BTreeSet<String> {
        self.resources.iter().map(|entry| entry.key().clone()).collect()
    }

    fn exists(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    fn read_bytes(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.resources
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if !is_valid_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        self.resources.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}
