use std::{
    ffi::OsStr,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{bail, Context, Result};
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{traits::AuditSink, AuditEntry};

/// Append-only, hash-chained audit log shared across components.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<Mutex<AuditState>>,
    options: AuditOptions,
}

struct AuditState {
    file: File,
    last_hash: [u8; 32],
    events_since_flush: u32,
}

#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub path: PathBuf,
    pub flush_interval: u32,
    pub max_file_bytes: u64,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vault.audit.log"),
            flush_interval: 1,
            max_file_bytes: 256 * 1_024 * 1_024, // 256 MiB
        }
    }
}

/// Builder for configuring the audit log.
pub struct AuditLogBuilder {
    options: AuditOptions,
}

impl AuditLogBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            options: AuditOptions {
                path: path.into(),
                ..Default::default()
            },
        }
    }

    pub fn flush_interval(mut self, every: u32) -> Self {
        self.options.flush_interval = every.max(1);
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.options.max_file_bytes = bytes;
        self
    }

    pub fn build(self) -> Result<AuditLog> {
        AuditLog::with_options(self.options)
    }
}

impl AuditLog {
    pub fn builder(path: impl Into<PathBuf>) -> AuditLogBuilder {
        AuditLogBuilder::new(path)
    }

    pub fn from_env() -> Result<Self> {
        let path = std::env::var("VAULT_AUDIT_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("vault.audit.log"));
        let flush = std::env::var("VAULT_AUDIT_FLUSH")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);

        AuditLog::builder(path).flush_interval(flush).build()
    }

    fn with_options(options: AuditOptions) -> Result<Self> {
        if let Some(parent) = options.path.parent() {
            fs::create_dir_all(parent).ok();
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&options.path)
            .with_context(|| format!("unable to open audit log at {}", options.path.display()))?;

        let last_hash = recover_last_hash(&options.path)?;

        let state = AuditState {
            file,
            last_hash,
            events_since_flush: 0,
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    pub fn record(&self, entry: AuditEntry) -> Result<AuditRecord> {
        let mut state = self.inner.lock().expect("audit mutex poisoned");
        let next_hash = chain_hash(&state.last_hash, &entry)?;

        let record = AuditRecord {
            entry,
            prev_hash: hex::encode(state.last_hash),
            hash: hex::encode(next_hash),
        };

        write_record(&mut state.file, &record)?;
        state.last_hash = next_hash;

        state.events_since_flush += 1;
        if state.events_since_flush >= self.options.flush_interval {
            state.file.sync_data().ok();
            state.events_since_flush = 0;
        }

        if self.options.max_file_bytes > 0 {
            if let Ok(meta) = state.file.metadata() {
                if meta.len() >= self.options.max_file_bytes {
                    rotate_file(&self.options, &mut state)?;
                }
            }
        }

        Ok(record)
    }

    pub fn last_hash(&self) -> String {
        let state = self.inner.lock().expect("audit mutex poisoned");
        hex::encode(state.last_hash)
    }

    /// Recompute the chain across every rotated segment and the live file,
    /// oldest first. Returns the number of records checked.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let mut expected = [0u8; 32];
        let mut checked = 0usize;

        let mut segments = rotated_segments(path);
        segments.push(path.to_path_buf());

        for segment in segments.iter().filter(|p| p.is_file()) {
            let reader = BufReader::new(File::open(segment)?);
            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let at = || format!("{}:{}", segment.display(), index + 1);
                let record: AuditRecord = serde_json::from_str(&line)
                    .with_context(|| format!("unparseable audit record at {}", at()))?;
                if record.prev_hash != hex::encode(expected) {
                    bail!("audit chain broken at {}: prev_hash mismatch", at());
                }
                let digest = chain_hash(&expected, &record.entry)?;
                if record.hash != hex::encode(digest) {
                    bail!("audit chain broken at {}: hash mismatch", at());
                }
                expected = digest;
                checked += 1;
            }
        }

        Ok(checked)
    }
}

impl AuditSink for AuditLog {
    fn append(&self, entry: AuditEntry) -> Result<()> {
        self.record(entry).map(|_| ())
    }
}

/// BLAKE3 over the previous link and the entry JSON, which carries the
/// entry's own timestamp.
fn chain_hash(prev: &[u8; 32], entry: &AuditEntry) -> Result<[u8; 32]> {
    let entry_json = serde_json::to_string(entry)?;
    let mut hasher = Hasher::new();
    hasher.update(prev);
    hasher.update(entry_json.as_bytes());
    Ok(*hasher.finalize().as_bytes())
}

fn write_record(file: &mut File, record: &AuditRecord) -> Result<()> {
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn segment_path(path: &Path, index: u32) -> PathBuf {
    let file_name = path
        .file_name()
        .unwrap_or_else(|| OsStr::new("vault.audit.log"))
        .to_string_lossy()
        .to_string();
    path.with_file_name(format!("{file_name}.{index}"))
}

/// Rotated segments `<name>.1`, `<name>.2`, ... up to the first gap.
fn rotated_segments(path: &Path) -> Vec<PathBuf> {
    (1..)
        .map(|index| segment_path(path, index))
        .take_while(|segment| segment.exists())
        .collect()
}

fn rotate_file(options: &AuditOptions, state: &mut AuditState) -> Result<()> {
    let index = rotated_segments(&options.path).len() as u32 + 1;
    let rotated = segment_path(&options.path, index);

    state.file.sync_all().ok();
    if let Err(err) = fs::rename(&options.path, &rotated) {
        warn!(
            path = %options.path.display(),
            target = %rotated.display(),
            error = %err,
            "audit log rotation failed; continuing in current file"
        );
        return Ok(());
    }

    state.file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&options.path)
        .with_context(|| format!("unable to reopen audit log at {}", options.path.display()))?;
    Ok(())
}

/// Last hash of the newest non-empty segment, so a reopen right after
/// rotation continues the chain.
fn recover_last_hash(path: &Path) -> Result<[u8; 32]> {
    let mut segments = rotated_segments(path);
    segments.push(path.to_path_buf());

    for segment in segments.iter().rev() {
        if let Some(hash) = last_hash_in(segment)? {
            return Ok(hash);
        }
    }
    Ok([0u8; 32])
}

fn last_hash_in(path: &Path) -> Result<Option<[u8; 32]>> {
    if !path.is_file() {
        return Ok(None);
    }

    let reader = BufReader::new(File::open(path)?);
    let mut last = None;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) => {
                if let Ok(bytes) = hex::decode(&record.hash) {
                    if let Ok(hash) = <[u8; 32]>::try_from(bytes.as_slice()) {
                        last = Some(hash);
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to parse audit record");
            }
        }
    }

    Ok(last)
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub entry: AuditEntry,
    pub prev_hash: String,
    pub hash: String,
}
