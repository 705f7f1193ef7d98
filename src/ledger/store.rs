use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

/// A root value together with its revision. Revisions start at 1 for the
/// first write and grow by one on every successful store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub revision: u64,
    pub value: Value,
}

/// Precondition for [`LedgerStore::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Unconditional write (last writer wins).
    Any,
    /// The root must not exist yet.
    Absent,
    /// The root must still be at this revision.
    Revision(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored { revision: u64 },
    Stale { current: Option<u64> },
}

/// Root-key granular persistence underneath the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self, root: &str) -> anyhow::Result<Option<Versioned>>;
    async fn store(&self, root: &str, value: Value, expect: Expect)
    -> anyhow::Result<StoreOutcome>;
    /// Drops any cached state so the next `load` re-reads backing storage.
    async fn reload(&self) -> anyhow::Result<()>;
    async fn roots(&self) -> anyhow::Result<Vec<String>>;
}

fn check_expect(expect: Expect, current: Option<u64>) -> bool {
    match expect {
        Expect::Any => true,
        Expect::Absent => current.is_none(),
        Expect::Revision(rev) => current == Some(rev),
    }
}

pub fn validate_root_name(root: &str) -> anyhow::Result<()> {
    let valid = !root.is_empty()
        && root.len() <= 64
        && root
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if !valid {
        anyhow::bail!("invalid ledger root key: {root:?}");
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    roots: Mutex<BTreeMap<String, Versioned>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn load(&self, root: &str) -> anyhow::Result<Option<Versioned>> {
        Ok(self.roots.lock().await.get(root).cloned())
    }

    async fn store(
        &self,
        root: &str,
        value: Value,
        expect: Expect,
    ) -> anyhow::Result<StoreOutcome> {
        validate_root_name(root)?;
        let mut roots = self.roots.lock().await;
        let current = roots.get(root).map(|v| v.revision);
        if !check_expect(expect, current) {
            return Ok(StoreOutcome::Stale { current });
        }
        let revision = current.unwrap_or(0) + 1;
        roots.insert(root.to_owned(), Versioned { revision, value });
        Ok(StoreOutcome::Stored { revision })
    }

    async fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn roots(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.roots.lock().await.keys().cloned().collect())
    }
}

/// Cached state of one root: `None` until first read from disk.
type Slot = Arc<Mutex<Option<Option<Versioned>>>>;

/// One JSON document per root key under `base_dir`, written atomically via
/// temp-file rename. Each root has its own lock, so revision checks on one
/// root never wait on another. Two processes sharing a directory still race
/// at root granularity.
#[derive(Debug)]
pub struct FileLedger {
    base_dir: PathBuf,
    slots: std::sync::Mutex<HashMap<String, Slot>>,
}

impl FileLedger {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn root_path(&self, root: &str) -> PathBuf {
        self.base_dir.join(format!("{root}.json"))
    }

    fn slot(&self, root: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(root.to_owned()).or_default())
    }

    async fn read_root(&self, root: &str) -> anyhow::Result<Option<Versioned>> {
        let path = self.root_path(root);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }
}

#[async_trait]
impl LedgerStore for FileLedger {
    async fn load(&self, root: &str) -> anyhow::Result<Option<Versioned>> {
        validate_root_name(root)?;
        let slot = self.slot(root);
        let mut cached = slot.lock().await;
        if let Some(current) = cached.as_ref() {
            return Ok(current.clone());
        }
        let loaded = self.read_root(root).await?;
        *cached = Some(loaded.clone());
        Ok(loaded)
    }

    async fn store(
        &self,
        root: &str,
        value: Value,
        expect: Expect,
    ) -> anyhow::Result<StoreOutcome> {
        validate_root_name(root)?;
        let slot = self.slot(root);
        let mut cached = slot.lock().await;
        let current = match cached.as_ref() {
            Some(current) => current.as_ref().map(|v| v.revision),
            None => self.read_root(root).await?.map(|v| v.revision),
        };
        if !check_expect(expect, current) {
            return Ok(StoreOutcome::Stale { current });
        }

        let versioned = Versioned {
            revision: current.unwrap_or(0) + 1,
            value,
        };
        let path = self.root_path(root);
        write_json_atomic(&path, &versioned)
            .await
            .with_context(|| format!("write: {}", path.display()))?;
        let revision = versioned.revision;
        *cached = Some(Some(versioned));
        Ok(StoreOutcome::Stored { revision })
    }

    async fn reload(&self) -> anyhow::Result<()> {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for slot in slots {
            *slot.lock().await = None;
        }
        Ok(())
    }

    async fn roots(&self) -> anyhow::Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read dir: {}", self.base_dir.display()));
            }
        };
        let mut roots = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("list ledger dir")? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(root) = name.strip_suffix(".json")
                && validate_root_name(root).is_ok()
            {
                roots.push(root.to_owned());
            }
        }
        roots.sort();
        Ok(roots)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
