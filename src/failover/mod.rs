//! Remote failover store
//!
//! Persists a local gzip copy of every remote source ever successfully
//! fetched, with an optional checksum, so that a node whose remote is
//! unreachable at the next startup or reload can still come up with the
//! last-known-good configuration.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::fs::{atomic_write, gunzip, sha256_hex};
use crate::common::{ConfigError, Result};

/// Filename of the serialized store state inside the failover directory.
pub const STATE_FILE: &str = "remote-failover.json";

/// The only checksum algorithm currently supported.
pub const CHECKSUM_ALGORITHM_SHA256: &str = "sha256";

/// Deployment policy for the failover store.
#[derive(Debug, Clone)]
pub struct FailoverSettings {
    /// Directory holding copies and the state file
    pub dir: PathBuf,
    /// Checksum algorithm; `None` disables checksumming of new copies
    pub checksum_algorithm: Option<String>,
    /// Whether a record without a verifiable checksum may be used
    pub checksum_required: bool,
    /// Maximum usable age of a record; `None` disables staleness checks
    pub max_age: Option<Duration>,
}

impl FailoverSettings {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            checksum_algorithm: Some(CHECKSUM_ALGORITHM_SHA256.to_string()),
            checksum_required: true,
            max_age: None,
        }
    }
}

/// One record per remote URL that has ever been cached locally.
///
/// A record with no filename has never been durably stored; an in-progress
/// write holds a temp file that is not part of persisted state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFailoverRecord {
    pub url: String,
    /// On-disk filename relative to the failover directory
    pub filename: Option<String>,
    /// Algorithm-tagged checksum of the uncompressed content, e.g. `sha256:ab12...`
    pub checksum: Option<String>,
    pub stored_at: Option<DateTime<Utc>>,
    /// Original transport validators so a later live fetch can be conditional
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Sequence number, never reused, assigned at record creation
    pub seq: u64,
}

impl RemoteFailoverRecord {
    fn new(url: &str, seq: u64) -> Self {
        Self {
            url: url.to_string(),
            filename: None,
            checksum: None,
            stored_at: None,
            etag: None,
            last_modified: None,
            seq,
        }
    }
}

/// Whole persisted record set, serialized as one unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteFailoverMap {
    pub next_seq: u64,
    pub records: BTreeMap<String, RemoteFailoverRecord>,
}

/// A usable local copy of remote content, checksum-verified per policy.
#[derive(Debug, Clone)]
pub struct FailoverCopy {
    /// Decompressed content
    pub content: Vec<u8>,
    /// Path of the gzip file on disk
    pub path: PathBuf,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub stored_at: Option<DateTime<Utc>>,
}

/// In-progress write of a failover copy: bytes are gzip-compressed and
/// hashed as they stream through.
pub struct FailoverWriter {
    url: String,
    tmp_path: PathBuf,
    encoder: GzEncoder<File>,
    hasher: Sha256,
}

impl FailoverWriter {
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.hasher.update(bytes);
        self.encoder.write_all(bytes)?;
        Ok(())
    }
}

struct StoreInner {
    map: RemoteFailoverMap,
    dirty: bool,
}

/// Registry of locally cached remote copies.
///
/// Mutated only from the single reload-pass execution context; the state
/// file and copies may be read concurrently because every write goes
/// through temp-file-plus-durable-rename.
pub struct RemoteFailoverStore {
    settings: FailoverSettings,
    inner: Mutex<StoreInner>,
}

impl RemoteFailoverStore {
    /// Open the store, reading the state file back if present.
    ///
    /// A missing state file is not an error; it yields an empty store.
    pub fn open(settings: FailoverSettings) -> Result<Self> {
        fs::create_dir_all(&settings.dir)?;
        let state_path = settings.dir.join(STATE_FILE);

        let map = if state_path.exists() {
            let raw = fs::read(&state_path)?;
            serde_json::from_slice(&raw).map_err(|e| {
                ConfigError::Malformed(format!(
                    "failover state file {} unreadable: {}",
                    state_path.display(),
                    e
                ))
            })?
        } else {
            debug!(
                "no failover state file at {}, starting empty",
                state_path.display()
            );
            RemoteFailoverMap::default()
        };

        Ok(Self {
            settings,
            inner: Mutex::new(StoreInner { map, dirty: false }),
        })
    }

    pub fn settings(&self) -> &FailoverSettings {
        &self.settings
    }

    /// Get or create the record for `url`, assigning a fresh sequence
    /// number on creation.
    pub fn record_for(&self, url: &str) -> RemoteFailoverRecord {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.map.records.get(url) {
            return record.clone();
        }
        let seq = inner.map.next_seq;
        inner.map.next_seq += 1;
        let record = RemoteFailoverRecord::new(url, seq);
        inner.map.records.insert(url.to_string(), record.clone());
        inner.dirty = true;
        record
    }

    /// Begin writing a new copy for `url`.
    ///
    /// Any prior unfinished temp file for the same URL is discarded first;
    /// it indicates a previous write never completed.
    pub fn begin_write(&self, url: &str) -> Result<FailoverWriter> {
        let record = self.record_for(url);
        let tmp_path = self.settings.dir.join(format!("seq-{}.tmp", record.seq));

        if tmp_path.exists() {
            warn!(
                "discarding unfinished failover temp file {} for {}",
                tmp_path.display(),
                url
            );
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        Ok(FailoverWriter {
            url: url.to_string(),
            tmp_path,
            encoder: GzEncoder::new(file, Compression::default()),
            hasher: Sha256::new(),
        })
    }

    /// Finish a write: durably rename the temp file to its permanent name
    /// and stamp the record with checksum, validators and store time.
    pub fn commit_write(
        &self,
        writer: FailoverWriter,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Result<RemoteFailoverRecord> {
        let FailoverWriter {
            url,
            tmp_path,
            encoder,
            hasher,
        } = writer;

        let file = encoder.finish()?;
        file.sync_all()?;
        drop(file);

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{:02x}", byte));
        }

        let mut inner = self.inner.lock().unwrap();
        let updated = {
            let record = inner
                .map
                .records
                .get_mut(&url)
                .ok_or_else(|| ConfigError::Other(format!("no failover record for {}", url)))?;

            let filename = permanent_filename(&url, record.seq);
            let final_path = self.settings.dir.join(&filename);
            fs::rename(&tmp_path, &final_path)?;

            record.filename = Some(filename);
            record.checksum = self
                .settings
                .checksum_algorithm
                .as_deref()
                .map(|alg| format!("{}:{}", alg, hex));
            record.stored_at = Some(Utc::now());
            record.etag = etag;
            record.last_modified = last_modified;
            record.clone()
        };
        inner.dirty = true;

        debug!("stored failover copy of {} as {:?}", url, updated.filename);
        Ok(updated)
    }

    /// True if `max_age` is nonzero and the record was stored longer ago.
    pub fn is_stale(&self, record: &RemoteFailoverRecord, max_age: Option<Duration>) -> bool {
        let max_age = match max_age {
            Some(age) if !age.is_zero() => age,
            _ => return false,
        };
        match record.stored_at {
            Some(stored_at) => {
                let age = Utc::now().signed_duration_since(stored_at);
                age.to_std().map(|a| a > max_age).unwrap_or(false)
            }
            None => true,
        }
    }

    /// Find a usable local copy of `url`, verifying the checksum policy.
    ///
    /// Returns `None` when there is no durable record, the copy is stale or
    /// missing, the checksum does not verify, or the record carries no
    /// checksum while the deployment requires one. Callers substitute the
    /// copy for a live fetch; on `None` the original transport error is
    /// what propagates.
    pub fn find_copy(&self, url: &str) -> Option<FailoverCopy> {
        let record = {
            let inner = self.inner.lock().unwrap();
            inner.map.records.get(url).cloned()?
        };

        let filename = record.filename.as_deref()?;
        let path = self.settings.dir.join(filename);

        if self.is_stale(&record, self.settings.max_age) {
            warn!("failover copy of {} is stale, refusing to use it", url);
            return None;
        }

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("failover copy {} unreadable: {}", path.display(), e);
                return None;
            }
        };

        let content = match gunzip(&raw) {
            Ok(content) => content,
            Err(e) => {
                warn!("failover copy {} corrupt: {}", path.display(), e);
                return None;
            }
        };

        if !self.verify_checksum(url, &record, &content) {
            return None;
        }

        info!("substituting local failover copy for {}", url);
        Some(FailoverCopy {
            content,
            path,
            etag: record.etag,
            last_modified: record.last_modified,
            stored_at: record.stored_at,
        })
    }

    fn verify_checksum(&self, url: &str, record: &RemoteFailoverRecord, content: &[u8]) -> bool {
        match record.checksum.as_deref() {
            Some(tagged) => match tagged.split_once(':') {
                Some((CHECKSUM_ALGORITHM_SHA256, expected)) => {
                    let actual = sha256_hex(content);
                    if actual == expected {
                        true
                    } else {
                        warn!(
                            "failover copy of {} fails checksum verification, ignoring it",
                            url
                        );
                        false
                    }
                }
                Some((alg, _)) => {
                    warn!(
                        "failover copy of {} uses unsupported checksum algorithm {:?}",
                        url, alg
                    );
                    false
                }
                None => {
                    warn!("failover record for {} has untagged checksum", url);
                    false
                }
            },
            None => {
                if self.settings.checksum_required {
                    warn!(
                        "failover copy of {} has no checksum and checksums are required",
                        url
                    );
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Persist the state file if any record changed since the last flush.
    ///
    /// Rewritten as one unit via temp-file-plus-durable-rename.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&inner.map)
            .map_err(|e| ConfigError::Other(format!("failover state serialize: {}", e)))?;
        atomic_write(&self.settings.dir.join(STATE_FILE), &json)?;
        inner.dirty = false;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn record_snapshot(&self, url: &str) -> Option<RemoteFailoverRecord> {
        self.inner.lock().unwrap().map.records.get(url).cloned()
    }
}

/// Permanent filename for a copy: URL path basename and extension plus the
/// record's sequence number, readable and collision-free.
fn permanent_filename(url: &str, seq: u64) -> String {
    let path_part = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url);
    let basename = path_part
        .rsplit('/')
        .next()
        .filter(|b| !b.is_empty())
        .unwrap_or("config");

    let (stem, ext) = match basename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (basename, None),
    };

    let safe_stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    match ext {
        Some(ext) => format!("{}-{}.{}.gz", safe_stem, seq, ext),
        None => format!("{}-{}.gz", safe_stem, seq),
    }
}
