//! Ledger Store: path-addressed semi-structured persistence for leads,
//! credits, plans, projects, orders and settings.
//!
//! Every mutation is a read-modify-write of a whole root value guarded by the
//! root's revision. A writer that loses the race re-reads and re-applies its
//! change instead of clobbering the other writer.

pub mod keys;
pub mod path;
pub mod repos;
pub mod store;

use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use keys::{email_key, normalize_email};
pub use path::{LedgerPath, Segment};
pub use store::{Expect, FileLedger, LedgerStore, MemoryLedger, StoreOutcome, Versioned};

const MAX_UPDATE_ATTEMPTS: usize = 16;

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedger::new()))
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Reads the value at `path`. Missing keys and read failures both come
    /// back as `None`; failures are logged.
    pub async fn get(&self, path: &str) -> Option<Value> {
        match self.try_get(path).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(path, err = ?err, "ledger read failed; treating as missing");
                None
            }
        }
    }

    pub async fn try_get(&self, path: &str) -> anyhow::Result<Option<Value>> {
        let path = LedgerPath::parse(path)?;
        let Some(root) = self.store.load(path.root()).await? else {
            return Ok(None);
        };
        Ok(path::get_in(&root.value, path.segments())
            .filter(|v| !v.is_null())
            .cloned())
    }

    /// Best-effort write: failures are logged, never returned.
    pub async fn set(&self, path: &str, value: Value) {
        if let Err(err) = self.try_set(path, value).await {
            tracing::warn!(path, err = ?err, "ledger write failed");
        }
    }

    pub async fn try_set(&self, path: &str, value: Value) -> anyhow::Result<()> {
        let parsed = LedgerPath::parse(path)?;
        self.update_root(parsed.root(), |root| {
            path::set_in(root, parsed.segments(), value.clone())
        })
        .await
        .with_context(|| format!("set {parsed}"))
    }

    /// Best-effort append: failures are logged, never returned.
    pub async fn push(&self, path: &str, value: Value) {
        if let Err(err) = self.try_push(path, value).await {
            tracing::warn!(path, err = ?err, "ledger push failed");
        }
    }

    pub async fn try_push(&self, path: &str, value: Value) -> anyhow::Result<()> {
        let parsed = LedgerPath::parse(path)?;
        let coerced = self
            .update_root(parsed.root(), |root| {
                path::push_in(root, parsed.segments(), value.clone())
            })
            .await
            .with_context(|| format!("push {parsed}"))?;
        if coerced {
            tracing::warn!(path = %parsed, "push target was not an array; it was reset");
        }
        Ok(())
    }

    pub async fn reload(&self) {
        if let Err(err) = self.store.reload().await {
            tracing::warn!(err = ?err, "ledger reload failed");
        }
    }

    /// Applies `mutate` to the current root value and stores the result if it
    /// changed, retrying from a fresh read when another writer got there
    /// first. `mutate` may run more than once.
    pub async fn update_root<T, E, F>(&self, root: &str, mut mutate: F) -> Result<T, E>
    where
        F: FnMut(&mut Value) -> Result<T, E>,
        E: From<anyhow::Error>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let loaded = self
                .store
                .load(root)
                .await
                .with_context(|| format!("load ledger root {root}"))?;
            let (expect, original) = match loaded {
                Some(v) => (Expect::Revision(v.revision), v.value),
                None => (Expect::Absent, Value::Null),
            };

            let mut value = original.clone();
            let out = mutate(&mut value)?;
            if value == original {
                return Ok(out);
            }

            match self
                .store
                .store(root, value, expect)
                .await
                .with_context(|| format!("store ledger root {root}"))?
            {
                StoreOutcome::Stored { .. } => return Ok(out),
                StoreOutcome::Stale { current } => {
                    tracing::debug!(root, attempt, ?current, "ledger root changed; retrying");
                }
            }
        }

        Err(anyhow::anyhow!(
            "ledger root {root} kept changing; gave up after {MAX_UPDATE_ATTEMPTS} attempts"
        )
        .into())
    }

    /// Reads a root and validates it against its typed schema. A missing root
    /// yields `T::default()`.
    pub async fn read_typed<T>(&self, root: &str) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let loaded = self
            .store
            .load(root)
            .await
            .with_context(|| format!("load ledger root {root}"))?;
        match loaded {
            Some(v) => decode_root(root, v.value),
            None => Ok(T::default()),
        }
    }

    /// Typed counterpart of [`Ledger::update_root`].
    pub async fn update_typed<T, R, E, F>(&self, root: &str, mut mutate: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnMut(&mut T) -> Result<R, E>,
        E: From<anyhow::Error>,
    {
        self.update_root(root, |value| {
            let mut typed: T = decode_root(root, std::mem::take(value))?;
            let out = mutate(&mut typed)?;
            *value = serde_json::to_value(&typed)
                .with_context(|| format!("serialize ledger root {root}"))?;
            Ok(out)
        })
        .await
    }
}

fn decode_root<T>(root: &str, value: Value) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value)
        .with_context(|| format!("ledger root {root} does not match its schema"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn path_set_get_push_round_trip() {
        let ledger = Ledger::in_memory();
        ledger.set("credits/a_b_com", json!(2)).await;
        ledger.push("leads", json!({"email": "a@b.com"})).await;
        ledger.set("leads[0]/status", json!("PENDING")).await;

        assert_eq!(ledger.get("credits/a_b_com").await, Some(json!(2)));
        assert_eq!(ledger.get("/leads[0]/status").await, Some(json!("PENDING")));
        assert_eq!(ledger.get("credits/nobody").await, None);
        assert_eq!(ledger.get("not a [path").await, None);
    }

    #[tokio::test]
    async fn push_on_object_root_resets_it() {
        let ledger = Ledger::in_memory();
        ledger.set("orders/x", json!(1)).await;
        ledger.push("orders", json!("first")).await;
        assert_eq!(ledger.get("orders").await, Some(json!(["first"])));
    }

    #[tokio::test]
    async fn concurrent_sub_path_writers_do_not_clobber() -> anyhow::Result<()> {
        let ledger = Ledger::in_memory();
        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .try_set(&format!("credits/user_{i}"), json!(i))
                    .await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        let credits: BTreeMap<String, i64> = ledger.read_typed("credits").await?;
        assert_eq!(credits.len(), 20);
        assert_eq!(credits.get("user_7"), Some(&7));
        Ok(())
    }

    #[tokio::test]
    async fn typed_read_rejects_schema_mismatch() {
        let ledger = Ledger::in_memory();
        ledger.set("credits/a", json!("lots")).await;
        let err = ledger
            .read_typed::<BTreeMap<String, i64>>("credits")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("does not match its schema"));
    }

    #[tokio::test]
    async fn unchanged_update_does_not_bump_revision() -> anyhow::Result<()> {
        let ledger = Ledger::in_memory();
        ledger.try_set("settings/payment_bypass", json!(false)).await?;
        ledger
            .update_root::<_, anyhow::Error, _>("settings", |_| Ok(()))
            .await?;
        let rev = ledger.store().load("settings").await?.map(|v| v.revision);
        assert_eq!(rev, Some(1));
        Ok(())
    }
}
