use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "BOOKFORGE_";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LlmEngine {
    /// Deterministic offline text, no network.
    Noop,
    /// OpenAI Responses API (`OPENAI_API_KEY`).
    Openai,
}

impl LlmEngine {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "noop" => Ok(Self::Noop),
            "openai" => Ok(Self::Openai),
            other => anyhow::bail!("unsupported llm engine: {other}"),
        }
    }
}

/// Runtime settings. Every field has a default so an empty YAML file (or no
/// file at all) yields a working offline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub addr: SocketAddr,
    pub max_concurrency: usize,

    /// Length of the generated structure, introduction (id 0) included.
    pub chapter_count: usize,
    pub generation_timeout_secs: u64,
    pub chapter_attempts: usize,
    pub retry_backoff_ms: u64,
    pub finishing_delay_ms: u64,
    pub min_chapter_chars: usize,

    pub engine: LlmEngine,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_temperature: f32,

    pub checkout_base_url: String,
    pub public_base_url: String,
    pub webhook_token: Option<String>,
    /// Bearer token for the admin HTTP routes. Unset disables them.
    pub admin_token: Option<String>,
    pub notifier_url: Option<String>,
    pub notifier_token: Option<String>,
    pub notifier_from: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("bookforge-data"),
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_concurrency: 2,
            chapter_count: 15,
            generation_timeout_secs: 60,
            chapter_attempts: 3,
            retry_backoff_ms: 2_000,
            finishing_delay_ms: 1_500,
            min_chapter_chars: 200,
            engine: LlmEngine::Noop,
            openai_base_url: "https://api.openai.com/v1".to_owned(),
            openai_model: "gpt-4o-mini".to_owned(),
            openai_temperature: 0.7,
            checkout_base_url: "https://pay.bookforge.local/checkout".to_owned(),
            public_base_url: "http://127.0.0.1:8080".to_owned(),
            webhook_token: None,
            admin_token: None,
            notifier_url: None,
            notifier_token: None,
            notifier_from: "Bookforge <noreply@bookforge.local>".to_owned(),
        }
    }
}

impl Settings {
    /// Loads the optional YAML file, then applies `BOOKFORGE_*` overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => match std::env::var(format!("{ENV_PREFIX}CONFIG")) {
                Ok(raw) if !raw.trim().is_empty() => Self::from_yaml_file(Path::new(raw.trim()))?,
                _ => Self::default(),
            },
        };
        settings
            .apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
            .context("apply environment overrides")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("parse settings yaml")
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ADDR") {
            self.addr = v.parse().with_context(|| format!("invalid {ENV_PREFIX}ADDR={v:?}"))?;
        }
        if let Some(v) = get("MAX_CONCURRENCY") {
            self.max_concurrency = parse_number("MAX_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("CHAPTER_COUNT") {
            self.chapter_count = parse_number("CHAPTER_COUNT", &v)?;
        }
        if let Some(v) = get("GENERATION_TIMEOUT_SECS") {
            self.generation_timeout_secs = parse_number("GENERATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("CHAPTER_ATTEMPTS") {
            self.chapter_attempts = parse_number("CHAPTER_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = parse_number("RETRY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("FINISHING_DELAY_MS") {
            self.finishing_delay_ms = parse_number("FINISHING_DELAY_MS", &v)?;
        }
        if let Some(v) = get("ENGINE") {
            self.engine = LlmEngine::parse(&v)
                .with_context(|| format!("invalid {ENV_PREFIX}ENGINE={v:?}"))?;
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.openai_base_url = v;
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.openai_model = v;
        }
        if let Some(v) = get("CHECKOUT_BASE_URL") {
            self.checkout_base_url = v;
        }
        if let Some(v) = get("PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Some(v) = get("WEBHOOK_TOKEN") {
            self.webhook_token = Some(v);
        }
        if let Some(v) = get("ADMIN_TOKEN") {
            self.admin_token = Some(v);
        }
        if let Some(v) = get("MIN_CHAPTER_CHARS") {
            self.min_chapter_chars = parse_number("MIN_CHAPTER_CHARS", &v)?;
        }
        if let Some(v) = get("NOTIFIER_URL") {
            self.notifier_url = Some(v);
        }
        if let Some(v) = get("NOTIFIER_TOKEN") {
            self.notifier_token = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chapter_count < 2 {
            anyhow::bail!("chapter_count must be >= 2 (introduction plus one chapter)");
        }
        if self.chapter_attempts == 0 {
            anyhow::bail!("chapter_attempts must be > 0");
        }
        if self.generation_timeout_secs == 0 {
            anyhow::bail!("generation_timeout_secs must be > 0");
        }
        url::Url::parse(&self.checkout_base_url)
            .with_context(|| format!("invalid checkout_base_url: {}", self.checkout_base_url))?;
        url::Url::parse(&self.openai_base_url)
            .with_context(|| format!("invalid openai_base_url: {}", self.openai_base_url))?;
        if let Some(notifier_url) = &self.notifier_url {
            url::Url::parse(notifier_url)
                .with_context(|| format!("invalid notifier_url: {notifier_url}"))?;
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn finishing_delay(&self) -> Duration {
        Duration::from_millis(self.finishing_delay_ms)
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

fn parse_number<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("invalid {ENV_PREFIX}{key}={raw:?}"))
}
