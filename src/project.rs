use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::keys::normalize_email;

/// Placeholder written into a chapter whose generation attempts were all
/// exhausted. A later writing run treats such chapters as unwritten.
pub const CHAPTER_ERROR_PREFIX: &str = "[Erro na geração deste capítulo.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Idle,
    Researching,
    WaitingTitle,
    GeneratingStructure,
    ReviewStructure,
    WritingChapters,
    GeneratingMarketing,
    WaitingDetails,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Researching => "RESEARCHING",
            Self::WaitingTitle => "WAITING_TITLE",
            Self::GeneratingStructure => "GENERATING_STRUCTURE",
            Self::ReviewStructure => "REVIEW_STRUCTURE",
            Self::WritingChapters => "WRITING_CHAPTERS",
            Self::GeneratingMarketing => "GENERATING_MARKETING",
            Self::WaitingDetails => "WAITING_DETAILS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a FAILED project can be resumed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    Structure,
    Writing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Structure => "structure",
            Self::Writing => "writing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranslationStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationState {
    pub status: TranslationStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_title: Option<String>,
    /// Translated chapter bodies keyed by chapter id.
    #[serde(default)]
    pub chapters: BTreeMap<u32, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub status: ProjectStatus,
    pub progress: u8,
    #[serde(default)]
    pub status_message: String,
    pub topic: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub book_title: String,
    #[serde(default)]
    pub sub_title: String,
    pub language: String,
    pub contact: Contact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledgments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about_author: Option<String>,
    #[serde(default)]
    pub translations: BTreeMap<String, TranslationState>,
    /// Book supplied by the author rather than generated from a topic.
    #[serde(default)]
    pub pre_written: bool,
    /// A credit was consumed when the project was created.
    #[serde(default)]
    pub entitled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleOption {
    pub title: String,
    #[serde(default, alias = "subtitle")]
    pub sub_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_generated: bool,
}

impl Chapter {
    pub fn is_placeholder(&self) -> bool {
        self.content.trim_start().starts_with(CHAPTER_ERROR_PREFIX)
    }

    /// Real content of at least `min_chars` characters.
    pub fn is_written(&self, min_chars: usize) -> bool {
        !self.is_placeholder() && self.content.trim().chars().count() >= min_chars
    }
}

/// Sales copy. `synopsis` is required so that wrapper objects around the
/// copy never parse as an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marketing {
    pub synopsis: String,
    #[serde(default)]
    pub back_cover: String,
    #[serde(default)]
    pub flap: String,
    #[serde(default)]
    pub youtube_description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub version: u64,
    pub metadata: Metadata,
    #[serde(default)]
    pub research_context: String,
    #[serde(default)]
    pub title_options: Vec<TitleOption>,
    #[serde(default)]
    pub structure: Vec<Chapter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing: Option<Marketing>,
}

/// Input for project creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub topic: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub pre_written: bool,
}

pub const DEFAULT_LANGUAGE: &str = "pt-BR";

impl Project {
    pub fn new(request: &NewProject, entitled: bool) -> Self {
        let now = Utc::now();
        let email = normalize_email(&request.email);
        let author_name = request
            .author_name
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(request.name.trim())
            .to_owned();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: 0,
            metadata: Metadata {
                status: ProjectStatus::Idle,
                progress: 0,
                status_message: "Projeto criado".to_owned(),
                topic: request.topic.trim().to_owned(),
                author_name,
                book_title: String::new(),
                sub_title: String::new(),
                language: request
                    .language
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .unwrap_or(DEFAULT_LANGUAGE)
                    .to_owned(),
                contact: Contact {
                    name: request.name.trim().to_owned(),
                    email,
                    phone: request.phone.clone(),
                },
                dedication: None,
                acknowledgments: None,
                about_author: None,
                translations: BTreeMap::new(),
                pre_written: request.pre_written,
                entitled,
                failed_stage: None,
                artifact_url: None,
                delivered_at: None,
                created_at: now,
                updated_at: now,
            },
            research_context: String::new(),
            title_options: Vec::new(),
            structure: Vec::new(),
            marketing: None,
        }
    }

    pub fn status(&self) -> ProjectStatus {
        self.metadata.status
    }

    pub fn email(&self) -> &str {
        &self.metadata.contact.email
    }

    pub fn belongs_to(&self, email: &str) -> bool {
        normalize_email(&self.metadata.contact.email) == normalize_email(email)
    }

    /// Non-terminal generator project (pre-written books excluded).
    pub fn is_active_generation(&self) -> bool {
        !self.metadata.status.is_terminal() && !self.metadata.pre_written
    }

    pub fn set_progress(&mut self, status: ProjectStatus, progress: u8, message: impl Into<String>) {
        self.metadata.status = status;
        self.metadata.progress = progress.min(100);
        self.metadata.status_message = message.into();
    }

    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        self.metadata.status = ProjectStatus::Failed;
        self.metadata.status_message = message.into();
        self.metadata.failed_stage = Some(stage);
    }

    pub fn chapter_mut(&mut self, id: u32) -> Option<&mut Chapter> {
        self.structure.iter_mut().find(|c| c.id == id)
    }
}
