use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{DurableStorage, StorageError, StorageResult};

const SESSION_FILE: &str = "session.json";

/// Storage backed by `<dir>/session.json`, a flat JSON object of string values.
///
/// The file is read once on open and rewritten on every mutation via a temp file and
/// rename, so a crash mid-write leaves either the old or the new contents.
pub struct FileStorage {
    dir: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = dir.join(SESSION_FILE);
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    // Unreadable contents are dropped; the session store then starts signed out.
                    warn!(target: "echo::storage", "ignoring unreadable {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_err(&path, e)),
        };
        debug!(target: "echo::storage", "opened {} with {} keys", path.display(), entries.len());
        Ok(Self { dir, entries: Mutex::new(entries) })
    }

    pub fn path(&self) -> PathBuf { self.dir.join(SESSION_FILE) }

    fn flush(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let path = self.path();
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io { path: path.display().to_string(), source }
}

impl DurableStorage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut g = self.entries.lock();
        let prev = g.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&g) {
            // keep memory and disk in agreement
            match prev {
                Some(p) => { g.insert(key.to_string(), p); }
                None => { g.remove(key); }
            }
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut g = self.entries.lock();
        let Some(prev) = g.remove(key) else { return Ok(()); };
        if let Err(e) = self.flush(&g) {
            g.insert(key.to_string(), prev);
            return Err(e);
        }
        Ok(())
    }
}
