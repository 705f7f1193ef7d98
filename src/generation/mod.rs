//! Generation Capability: text and JSON generation behind one trait.

pub mod json;
pub mod noop;
pub mod openai;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

pub use noop::NoopGenerator;
pub use openai::OpenAiGenerator;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("malformed output: {0}")]
    Malformed(String),
    #[error("provider returned an empty result")]
    Empty,
}

/// What a prompt is for. Backends may route or log on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    VideoResearch,
    WebResearch,
    CompetitorResearch,
    TitleOptions,
    Structure,
    Chapter,
    Introduction,
    FrontMatter,
    Marketing,
    Translation,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VideoResearch => "video_research",
            Self::WebResearch => "web_research",
            Self::CompetitorResearch => "competitor_research",
            Self::TitleOptions => "title_options",
            Self::Structure => "structure",
            Self::Chapter => "chapter",
            Self::Introduction => "introduction",
            Self::FrontMatter => "front_matter",
            Self::Marketing => "marketing",
            Self::Translation => "translation",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub task: Task,
    pub system: Option<String>,
    pub user: String,
    /// Chapter the prompt is about, for chapter-level tasks.
    pub chapter: Option<u32>,
    /// The caller will parse the answer as a JSON object.
    pub json: bool,
}

impl Prompt {
    pub fn new(task: Task, user: impl Into<String>) -> Self {
        Self {
            task,
            system: None,
            user: user.into(),
            chapter: None,
            json: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn for_chapter(mut self, id: u32) -> Self {
        self.chapter = Some(id);
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json = true;
        self
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Arc<G> {
    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        (**self).generate_text(prompt).await
    }
}

/// Generates text and parses the first well-formed JSON object in it.
pub async fn generate_json<T>(generator: &dyn Generator, prompt: &Prompt) -> Result<T, GenerationError>
where
    T: DeserializeOwned,
{
    let prompt = if prompt.json {
        prompt.clone()
    } else {
        prompt.clone().expect_json()
    };
    let raw = generator.generate_text(&prompt).await?;
    json::parse_lenient(&raw)
}

/// Bounds every call of the wrapped generator.
pub struct TimeoutGenerator {
    inner: Arc<dyn Generator>,
    timeout: Duration,
}

impl TimeoutGenerator {
    pub fn new(inner: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Generator for TimeoutGenerator {
    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        match tokio::time::timeout(self.timeout, self.inner.generate_text(prompt)).await {
            Ok(result) => {
                let text = result?;
                if text.trim().is_empty() {
                    return Err(GenerationError::Empty);
                }
                Ok(text)
            }
            Err(_) => {
                tracing::warn!(task = %prompt.task, timeout = ?self.timeout, "generation timed out");
                Err(GenerationError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl Generator for Fixed {
        async fn generate_text(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            Ok(self.0.to_owned())
        }
    }

    struct Slow;

    #[async_trait]
    impl Generator for Slow {
        async fn generate_text(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_owned())
        }
    }

    #[derive(Debug, Deserialize)]
    struct Titles {
        titles: Vec<String>,
    }

    #[tokio::test]
    async fn json_is_salvaged_from_chatty_output() {
        let generator = Fixed("Claro! Aqui está:\n```json\n{\"titles\": [\"A\", \"B\"]}\n```");
        let parsed: Titles = generate_json(&generator, &Prompt::new(Task::TitleOptions, "x"))
            .await
            .unwrap();
        assert_eq!(parsed.titles, vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_as_timeout_error() {
        let generator = TimeoutGenerator::new(Arc::new(Slow), Duration::from_millis(100));
        let err = generator
            .generate_text(&Prompt::new(Task::Chapter, "x"))
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn blank_output_is_empty_not_success() {
        let generator = TimeoutGenerator::new(Arc::new(Fixed("  \n")), Duration::from_secs(1));
        let err = generator
            .generate_text(&Prompt::new(Task::Chapter, "x"))
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Empty);
    }
}
