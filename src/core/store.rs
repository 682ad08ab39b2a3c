//! Durable message history.
//!
//! Layout under the store directory:
//! - `index.json` : slim index entries plus the id counter
//! - `<id>.json`  : one full record per stored envelope

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::{Envelope, Recipient, Sender};

const INDEX_FILE: &str = "index.json";

/// Slim index entry kept for every stored envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Recipient>,
    pub timestamp: String,
    pub saved_at: DateTime<Utc>,
}

impl IndexEntry {
    /// Sent by or addressed to `agent_id`. Broadcasts and role-targeted
    /// messages carry no agent id and are visible to every agent.
    fn involves(&self, agent_id: &str) -> bool {
        self.sender.id == agent_id
            || match self.recipient.as_ref().and_then(Recipient::agent_id) {
                Some(id) => id == agent_id,
                None => true,
            }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreIndex {
    messages: Vec<IndexEntry>,
    last_id: u64,
}

/// A persisted envelope with store bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "_id")]
    pub store_id: String,
    #[serde(rename = "_savedAt")]
    pub saved_at: DateTime<Utc>,
    #[serde(rename = "_read", default)]
    pub read: bool,
}

/// Aggregate counts over the stored history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub today: usize,
    pub by_type: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// File-backed store of every accepted envelope.
#[derive(Debug)]
pub struct MessageStore {
    dir: PathBuf,
    index: StoreIndex,
}

impl MessageStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let content = fs::read_to_string(&index_path)?;
            serde_json::from_str(&content).map_err(|e| {
                Error::Store(format!("corrupt index {}: {}", index_path.display(), e))
            })?
        } else {
            StoreIndex::default()
        };

        tracing::debug!(dir = %dir.display(), records = index.messages.len(), "Opened message store");
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.index.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.messages.is_empty()
    }

    /// Persist an envelope. An envelope without an id gets one assigned.
    pub fn save(&mut self, mut envelope: Envelope) -> Result<StoredRecord> {
        if envelope.id.trim().is_empty() {
            self.index.last_id += 1;
            envelope.id = format!("msg-{}-{}", Utc::now().timestamp_millis(), self.index.last_id);
        }

        let record = StoredRecord {
            store_id: envelope.id.clone(),
            saved_at: Utc::now(),
            read: false,
            envelope,
        };

        fs::write(
            self.record_path(&record.store_id),
            serde_json::to_string_pretty(&record)?,
        )?;

        let entry = IndexEntry {
            id: record.store_id.clone(),
            kind: record.envelope.kind.clone(),
            sender: record.envelope.sender.clone(),
            recipient: record.envelope.recipient.clone(),
            timestamp: record.envelope.timestamp.clone(),
            saved_at: record.saved_at,
        };
        self.index.messages.retain(|e| e.id != entry.id);
        self.index.messages.push(entry);
        self.write_index()?;

        tracing::debug!(message_id = %record.store_id, "Message saved");
        Ok(record)
    }

    /// Load a full record by id.
    pub fn get(&self, id: &str) -> Result<Option<StoredRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Flag a stored message as read. Returns false if the id is unknown.
    pub fn mark_read(&mut self, id: &str) -> Result<bool> {
        let Some(mut record) = self.get(id)? else {
            return Ok(false);
        };
        if !record.read {
            record.read = true;
            fs::write(self.record_path(id), serde_json::to_string_pretty(&record)?)?;
            tracing::debug!(message_id = %id, "Message marked read");
        }
        Ok(true)
    }

    /// Newest-first history, optionally restricted to messages an agent sent,
    /// received directly, or received through a broadcast or role target.
    pub fn get_all(&self, agent_id: Option<&str>, limit: usize) -> Result<Vec<StoredRecord>> {
        let mut records = Vec::new();
        for entry in self.newest_first() {
            if records.len() >= limit {
                break;
            }
            if agent_id.is_some_and(|id| !entry.involves(id)) {
                continue;
            }
            if let Some(record) = self.get(&entry.id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Case-insensitive substring search over serialized records.
    ///
    /// This is a linear scan; it suits the small histories a local swarm
    /// produces.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<StoredRecord>> {
        let needle = query.to_lowercase();
        let mut results = Vec::new();
        for entry in self.newest_first() {
            if results.len() >= limit {
                break;
            }
            let Some(record) = self.get(&entry.id)? else {
                continue;
            };
            if serde_json::to_string(&record)?.to_lowercase().contains(&needle) {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Delete records saved more than `max_age_days` ago. Returns how many
    /// were removed.
    pub fn cleanup(&mut self, max_age_days: u64) -> Result<usize> {
        let cutoff = i64::try_from(max_age_days)
            .ok()
            .and_then(ChronoDuration::try_days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (expired, kept): (Vec<IndexEntry>, Vec<IndexEntry>) = std::mem::take(&mut self.index.messages)
            .into_iter()
            .partition(|entry| entry.saved_at <= cutoff);
        self.index.messages = kept;

        for entry in &expired {
            match fs::remove_file(self.record_path(&entry.id)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(message_id = %entry.id, error = %e, "Failed to delete stored message"),
            }
        }

        if !expired.is_empty() {
            self.write_index()?;
            tracing::info!(deleted = expired.len(), max_age_days, "Cleaned up old messages");
        }
        Ok(expired.len())
    }

    pub fn stats(&self) -> StoreStats {
        let today = Utc::now().date_naive();
        let mut by_type = BTreeMap::new();
        for entry in &self.index.messages {
            *by_type.entry(entry.kind.clone()).or_insert(0) += 1;
        }
        StoreStats {
            total: self.index.messages.len(),
            today: self
                .index
                .messages
                .iter()
                .filter(|e| e.saved_at.date_naive() == today)
                .count(),
            by_type,
            oldest: self.index.messages.iter().map(|e| e.saved_at).min(),
            newest: self.index.messages.iter().map(|e| e.saved_at).max(),
        }
    }

    fn newest_first(&self) -> Vec<&IndexEntry> {
        let mut entries: Vec<&IndexEntry> = self.index.messages.iter().rev().collect();
        entries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        entries
    }

    fn write_index(&self) -> Result<()> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp, serde_json::to_string_pretty(&self.index)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(id)))
    }
}

/// Map a message id onto a file name that stays inside the store directory.
fn file_stem(id: &str) -> String {
    let safe = !id.is_empty()
        && !id.starts_with('.')
        && id != "index"
        && !id.starts_with("x-")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if safe {
        id.to_string()
    } else {
        let hex: String = id.bytes().map(|b| format!("{:02x}", b)).collect();
        format!("x-{}", hex)
    }
}
