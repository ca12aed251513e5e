use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use common::{traits::KeyStore, KeyPairRecord, StoreError};
use tracing::debug;

use crate::slots::SlotTable;

/// Key store persisted as a single JSON document.
///
/// Every mutation rewrites the document through a temporary file and a
/// rename, so a crash leaves either the old or the new table on disk. The
/// in-process mutex serialises writers; sharing one file between processes
/// is not supported.
pub struct FileKeyStore {
    path: PathBuf,
    table: Mutex<SlotTable>,
}

impl FileKeyStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let table = if path.exists() {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("unable to read key store at {}", path.display()))?;
            if data.trim().is_empty() {
                SlotTable::default()
            } else {
                serde_json::from_str(&data)
                    .with_context(|| format!("corrupt key store at {}", path.display()))?
            }
        } else {
            SlotTable::default()
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn from_env() -> Result<Self> {
        let path = std::env::var("VAULT_KEYSTORE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("vault.keys.json"));
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &SlotTable) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(table)?;
        let staging = self.path.with_extension("json.tmp");
        {
            let mut file = open_private(&staging).with_context(|| {
                format!("unable to stage key store at {}", staging.display())
            })?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        debug!(path = %self.path.display(), "key store persisted");
        Ok(())
    }

    /// Apply `op` to a scratch copy and only publish it once it is on disk.
    fn mutate<F>(&self, op: F) -> std::result::Result<(), StoreError>
    where
        F: FnOnce(&mut SlotTable) -> std::result::Result<(), StoreError>,
    {
        let mut guard = self.table.lock().expect("file key store mutex poisoned");
        let mut next = guard.clone();
        op(&mut next)?;
        self.persist(&next)
            .map_err(|err| StoreError::Backend(format!("{err:#}")))?;
        *guard = next;
        Ok(())
    }
}

/// Open `path` for writing, readable by the owner only. A leftover staging
/// file from an earlier crash is narrowed too, since `mode` only applies on
/// creation.
fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        let file = options.open(path)?;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        Ok(file)
    }

    #[cfg(not(unix))]
    {
        options.open(path)
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self, name: &str) -> std::result::Result<Option<KeyPairRecord>, StoreError> {
        let guard = self.table.lock().expect("file key store mutex poisoned");
        Ok(guard.get(name))
    }

    fn insert(&self, record: KeyPairRecord) -> std::result::Result<(), StoreError> {
        self.mutate(|table| table.insert(record))
    }

    fn update(
        &self,
        name: &str,
        expected_revision: u64,
        record: KeyPairRecord,
    ) -> std::result::Result<(), StoreError> {
        self.mutate(|table| table.update(name, expected_revision, record))
    }

    fn retired(&self, name: &str) -> std::result::Result<Vec<KeyPairRecord>, StoreError> {
        let guard = self.table.lock().expect("file key store mutex poisoned");
        Ok(guard.retired(name))
    }
}
