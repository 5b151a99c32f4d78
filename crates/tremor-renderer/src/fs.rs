//! File system collaborator: the pak/virtual file layer lives behind this
//! trait. `StdFileSystem` maps it onto a plain directory; `MemoryFileSystem`
//! backs the test suite.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::FsError;

pub trait FileSystem: Send + Sync {
    fn read_file(&self, name: &str) -> Result<Vec<u8>, FsError>;
    /// Best-effort write; cache files tolerate failure.
    fn write_file(&self, name: &str, data: &[u8]) -> Result<(), FsError>;
    fn exists(&self, name: &str) -> bool {
        self.read_file(name).is_ok()
    }
}

// =============================================================
//  Directory-backed implementation
// =============================================================

pub struct StdFileSystem {
    base: PathBuf,
}

impl StdFileSystem {
    pub fn new(base: impl Into<PathBuf>) -> StdFileSystem {
        StdFileSystem { base: base.into() }
    }
}

impl FileSystem for StdFileSystem {
    fn read_file(&self, name: &str) -> Result<Vec<u8>, FsError> {
        let path = self.base.join(name);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::NotFound(name.to_owned())
            } else {
                FsError::Io(e.to_string())
            }
        })
    }

    fn write_file(&self, name: &str, data: &[u8]) -> Result<(), FsError> {
        let path = self.base.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FsError::Io(e.to_string()))?;
        }
        std::fs::write(&path, data).map_err(|e| FsError::Io(e.to_string()))
    }
}

// =============================================================
//  In-memory implementation
// =============================================================

#[derive(Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFileSystem {
    pub fn new() -> MemoryFileSystem {
        MemoryFileSystem::default()
    }

    pub fn insert(&self, name: &str, data: impl Into<Vec<u8>>) {
        self.files.lock().insert(name.to_owned(), data.into());
    }

    pub fn remove(&self, name: &str) {
        self.files.lock().remove(name);
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_file(&self, name: &str) -> Result<Vec<u8>, FsError> {
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::NotFound(name.to_owned()))
    }

    fn write_file(&self, name: &str, data: &[u8]) -> Result<(), FsError> {
        self.insert(name, data);
        Ok(())
    }
}
