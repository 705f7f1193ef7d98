use std::path::{Component, Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

pub const ARTIFACTS_ROUTE: &str = "/artifacts";

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `path` and returns a public URL when the store
    /// has one.
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str)
    -> anyhow::Result<Option<String>>;

    /// Accepts either a stored path or a URL previously returned by `upload`.
    async fn download(&self, url_or_path: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

#[derive(Debug, Clone)]
pub struct LocalFsBlobStore {
    base_dir: PathBuf,
    public_base_url: Option<String>,
}

impl LocalFsBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            public_base_url: None,
        }
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into().trim_end_matches('/').to_owned());
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves a relative blob path, refusing anything that would escape
    /// the base directory.
    pub fn resolve(&self, rel: &str) -> anyhow::Result<PathBuf> {
        let rel = rel.trim().trim_start_matches('/');
        let rel_path = Path::new(rel);
        if rel.is_empty()
            || rel_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("invalid blob path: {rel:?}");
        }
        Ok(self.base_dir.join(rel_path))
    }

    fn strip_url<'a>(&self, url_or_path: &'a str) -> &'a str {
        let mut rest = url_or_path;
        if let Some(base) = &self.public_base_url
            && let Some(stripped) = rest.strip_prefix(base.as_str())
        {
            rest = stripped;
        }
        rest.strip_prefix(ARTIFACTS_ROUTE).unwrap_or(rest)
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> anyhow::Result<Option<String>> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create blob dir: {}", parent.display()))?;
        }
        let tmp = target.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("write blob: {}", tmp.display()))?;
        fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("rename blob: {}", target.display()))?;

        tracing::debug!(path, content_type, size = bytes.len(), "blob stored");
        let rel = path.trim().trim_start_matches('/');
        Ok(self
            .public_base_url
            .as_ref()
            .map(|base| format!("{base}{ARTIFACTS_ROUTE}/{rel}")))
    }

    async fn download(&self, url_or_path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let target = self.resolve(self.strip_url(url_or_path))?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read blob: {}", target.display())),
        }
    }
}
