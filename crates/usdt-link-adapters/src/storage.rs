use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use usdt_link_core::{PortError, SessionStore};

/// Session tokens in a small JSON object on disk. Writes go through a
/// sibling temp file and a rename.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, PortError> {
        self.lock
            .lock()
            .map_err(|e| PortError::Transport(format!("session store lock poisoned: {e}")))
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, PortError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(PortError::Transport(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            PortError::Validation(format!("corrupt session store {}: {e}", self.path.display()))
        })
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), PortError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| PortError::Transport(format!("failed to create {}: {e}", parent.display())))?;
        }
        let body = serde_json::to_vec_pretty(values)
            .map_err(|e| PortError::Validation(format!("failed to encode session store: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| PortError::Transport(format!("failed to write {}: {e}", self.path.display())))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, key: &str) -> Result<Option<String>, PortError> {
        let _g = self.guard()?;
        Ok(self.read_all()?.remove(key))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PortError> {
        let _g = self.guard()?;
        let mut values = self.read_all()?;
        values.insert(key.to_owned(), value.to_owned());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<(), PortError> {
        let _g = self.guard()?;
        let mut values = match self.read_all() {
            Ok(values) => values,
            // Unreadable content is dropped along with the key.
            Err(PortError::Validation(_)) => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        let removed = values.remove(key).is_some();
        if values.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(PortError::Transport(format!(
                    "failed to remove {}: {e}",
                    self.path.display()
                ))),
            };
        }
        if !removed {
            return Ok(());
        }
        self.write_all(&values)
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    fn values(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, PortError> {
        self.values
            .lock()
            .map_err(|e| PortError::Transport(format!("session store lock poisoned: {e}")))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, key: &str) -> Result<Option<String>, PortError> {
        Ok(self.values()?.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PortError> {
        self.values()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PortError> {
        self.values()?.remove(key);
        Ok(())
    }
}
