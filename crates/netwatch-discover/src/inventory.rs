//! File-backed device inventory with allow/deny lists.
//!
//! Layout under the data directory:
//! ```text
//! {root}/
//!   devices.jsonl      one DeviceRecord per line, keyed by identity
//!   allowlist.txt      normalized hardware identifiers (or addresses)
//!   ip_allowlist.txt   addresses allowed regardless of hardware identifier
//!   denylist.txt       normalized hardware identifiers or addresses
//!   history.log        timestamp,identity,address,event
//! ```
//!
//! The same files are read and written by the administrative CLI. Every
//! read goes to disk so edits made between cycles are honoured. Mutations
//! are appends, except the last-seen refresh which rewrites the device table
//! through a temporary file and a rename. A crash mid-append can leave a
//! truncated final row; such rows are skipped on read and preserved on
//! rewrite.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use netwatch_core::{DeviceRecord, DeviceStatus, ListEntry};

use crate::error::StorageError;

pub const DEVICES_FILE: &str = "devices.jsonl";
pub const ALLOW_LIST_FILE: &str = "allowlist.txt";
pub const ADDRESS_ALLOW_LIST_FILE: &str = "ip_allowlist.txt";
pub const DENY_LIST_FILE: &str = "denylist.txt";
pub const HISTORY_FILE: &str = "history.log";

/// The durable device inventory.
///
/// Assumes a single writer per process; the internal lock serializes the
/// check-then-insert sequence so concurrent callers in one process cannot
/// insert the same identity twice.
pub struct Inventory {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl Inventory {
    /// Open the inventory rooted at `root`, creating the layout if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(StorageError::io(&root))?;

        for name in [
            DEVICES_FILE,
            ALLOW_LIST_FILE,
            ADDRESS_ALLOW_LIST_FILE,
            DENY_LIST_FILE,
            HISTORY_FILE,
        ] {
            let path = root.join(name);
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(StorageError::io(&path))?;
        }

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Reads ─────────────────────────────────────────────────────

    /// All device rows. Unparseable rows are skipped with a warning.
    pub fn get_all(&self) -> Result<Vec<DeviceRecord>, StorageError> {
        let path = self.path(DEVICES_FILE);
        let content = read_optional(&path)?;

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(idx, line)| match serde_json::from_str::<DeviceRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        error = %e,
                        "Skipping unreadable inventory row"
                    );
                    None
                }
            })
            .collect())
    }

    /// Devices whose address lies inside `range`.
    pub fn get_by_range(&self, range: &IpNet) -> Result<Vec<DeviceRecord>, StorageError> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|record| range.contains(&record.address))
            .collect())
    }

    pub fn get(&self, identity: &str) -> Result<Option<DeviceRecord>, StorageError> {
        Ok(self
            .get_all()?
            .into_iter()
            .find(|record| record.identity.eq_ignore_ascii_case(identity)))
    }

    pub fn exists(&self, identity: &str) -> Result<bool, StorageError> {
        Ok(self.get(identity)?.is_some())
    }

    /// Status for a device seen for the first time.
    ///
    /// Allow-list membership of the identity or the address wins over
    /// deny-list membership of the identity.
    pub fn determine_status(
        &self,
        identity: &str,
        address: &IpAddr,
    ) -> Result<DeviceStatus, StorageError> {
        let key = ListEntry::canonical_or_raw(identity);
        let address = address.to_string();

        let mut allowed = self.read_list(ALLOW_LIST_FILE)?;
        allowed.extend(self.read_list(ADDRESS_ALLOW_LIST_FILE)?);
        if allowed.contains(&key) || allowed.contains(&address) {
            return Ok(DeviceStatus::Authorized);
        }

        if self.read_list(DENY_LIST_FILE)?.contains(&key) {
            return Ok(DeviceStatus::Blocked);
        }

        Ok(DeviceStatus::Unknown)
    }

    fn read_list(&self, name: &str) -> Result<HashSet<String>, StorageError> {
        let content = read_optional(&self.path(name))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ListEntry::canonical_or_raw)
            .collect())
    }

    // ── Writes ────────────────────────────────────────────────────

    /// Append a device row unless its identity is already present.
    ///
    /// Returns `false`, leaving the table untouched, for a known identity.
    pub fn insert(&self, record: &DeviceRecord) -> Result<bool, StorageError> {
        let _guard = self.lock();
        if self.exists(&record.identity)? {
            tracing::debug!(identity = %record.identity, "Device already inventoried, not inserted");
            return Ok(false);
        }
        self.append_record(record)?;
        Ok(true)
    }

    /// Atomically check for `identity` and, if absent, insert a new record
    /// whose status is computed from the current lists.
    ///
    /// Returns the inserted record, or `None` if the identity was known.
    pub fn register_if_new(
        &self,
        identity: &str,
        address: IpAddr,
        vendor: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<Option<DeviceRecord>, StorageError> {
        let _guard = self.lock();

        if self.exists(identity)? {
            return Ok(None);
        }

        let status = self.determine_status(identity, &address)?;
        let record = DeviceRecord::new(identity, address, vendor, status, seen_at);
        self.append_record(&record)?;
        Ok(Some(record))
    }

    fn append_record(&self, record: &DeviceRecord) -> Result<(), StorageError> {
        let row = serde_json::to_string(record)?;
        append_line(&self.path(DEVICES_FILE), &row)?;

        tracing::debug!(
            identity = %record.identity,
            address = %record.address,
            status = %record.status,
            "Device inserted"
        );

        self.log_event(record, "connected");
        Ok(())
    }

    /// Set `last_seen` for every row whose identity is in `identities`.
    /// Identities are compared in canonical form, as in [`Inventory::get`].
    ///
    /// Rewrites the device table; rows that cannot be parsed are kept as-is.
    /// Returns the number of rows updated.
    pub fn touch(
        &self,
        identities: &HashSet<String>,
        seen_at: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        if identities.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock();
        let path = self.path(DEVICES_FILE);
        let content = read_optional(&path)?;
        let wanted: HashSet<String> = identities
            .iter()
            .map(|id| ListEntry::canonical_or_raw(id))
            .collect();

        let mut updated = 0;
        let mut rewritten = String::with_capacity(content.len());
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<DeviceRecord>(line) {
                Ok(mut record) if wanted.contains(&ListEntry::canonical_or_raw(&record.identity)) => {
                    record.last_seen = seen_at;
                    rewritten.push_str(&serde_json::to_string(&record)?);
                    updated += 1;
                }
                _ => rewritten.push_str(line),
            }
            rewritten.push('\n');
        }

        if updated == 0 {
            return Ok(0);
        }

        let tmp = path.with_extension("jsonl.tmp");
        fs::write(&tmp, rewritten).map_err(StorageError::io(&tmp))?;
        fs::rename(&tmp, &path).map_err(StorageError::io(&path))?;

        Ok(updated)
    }

    /// Add an entry to the allow-list. Hardware identifiers go to the
    /// main list, addresses to the address list.
    ///
    /// Returns `false` if the entry was already present.
    pub fn add_to_allow_list(&self, entry: &ListEntry) -> Result<bool, StorageError> {
        match entry {
            ListEntry::Hardware(_) => self.add_to_list(ALLOW_LIST_FILE, entry),
            ListEntry::Address(_) => self.add_to_list(ADDRESS_ALLOW_LIST_FILE, entry),
        }
    }

    /// Add an entry to the deny-list. Returns `false` if already present.
    pub fn add_to_deny_list(&self, entry: &ListEntry) -> Result<bool, StorageError> {
        self.add_to_list(DENY_LIST_FILE, entry)
    }

    fn add_to_list(&self, name: &str, entry: &ListEntry) -> Result<bool, StorageError> {
        let _guard = self.lock();
        let canonical = entry.canonical();

        if self.read_list(name)?.contains(&canonical) {
            return Ok(false);
        }

        append_line(&self.path(name), &canonical)?;
        tracing::info!(list = name, entry = %canonical, "List entry added");
        Ok(true)
    }

    fn log_event(&self, record: &DeviceRecord, event: &str) {
        let line = format!(
            "{},{},{},{event}",
            Utc::now().to_rfc3339(),
            record.identity,
            record.address
        );
        if let Err(e) = append_line(&self.path(HISTORY_FILE), &line) {
            tracing::warn!(error = %e, "Failed to record connection history");
        }
    }
}

/// Read a file, treating a missing file as empty.
fn read_optional(path: &Path) -> Result<String, StorageError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(StorageError::io(path)(e)),
    }
}

/// Append one line, first terminating a hand-edited final line if needed.
fn append_line(path: &Path, line: &str) -> Result<(), StorageError> {
    let needs_newline = !ends_with_newline(path).map_err(StorageError::io(path))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(StorageError::io(path))?;

    let mut buf = String::with_capacity(line.len() + 2);
    if needs_newline {
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');

    file.write_all(buf.as_bytes())
        .and_then(|()| file.flush())
        .map_err(StorageError::io(path))
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
