#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use bookforge::app::Services;
use bookforge::app::blob_store::LocalFsBlobStore;
use bookforge::app::notifier::{Email, Notifier};
use bookforge::config::Settings;
use bookforge::generation::{GenerationError, Generator, NoopGenerator, Prompt, Task};
use bookforge::ledger::Ledger;
use bookforge::pipeline::Collaborators;
use bookforge::project::{NewProject, Project};
use bookforge::render::{DocxRenderer, Rendered, Renderer};

pub const EMAIL: &str = "a@b.com";

/// Offline generator that records every call and can be told to fail
/// specific tasks or chapters.
#[derive(Default)]
pub struct ScriptedGenerator {
    calls: Mutex<Vec<(Task, Option<u32>)>>,
    failing_tasks: Mutex<HashSet<Task>>,
    failing_chapters: Mutex<HashSet<u32>>,
}

impl ScriptedGenerator {
    pub fn fail_task(&self, task: Task) {
        self.failing_tasks.lock().unwrap().insert(task);
    }

    pub fn heal_task(&self, task: Task) {
        self.failing_tasks.lock().unwrap().remove(&task);
    }

    pub fn fail_chapter(&self, id: u32) {
        self.failing_chapters.lock().unwrap().insert(id);
    }

    pub fn calls(&self) -> Vec<(Task, Option<u32>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, task: Task) -> usize {
        self.calls().iter().filter(|(t, _)| *t == task).count()
    }

    pub fn chapter_calls(&self, id: u32) -> usize {
        self.calls()
            .iter()
            .filter(|(t, c)| *t == Task::Chapter && *c == Some(id))
            .count()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.task, prompt.chapter));
        if self.failing_tasks.lock().unwrap().contains(&prompt.task) {
            return Err(GenerationError::Provider(format!("{} unavailable", prompt.task)));
        }
        if prompt.task == Task::Chapter
            && let Some(id) = prompt.chapter
            && self.failing_chapters.lock().unwrap().contains(&id)
        {
            return Err(GenerationError::Provider(format!("chapter {id} rejected")));
        }
        NoopGenerator.generate_text(prompt).await
    }
}

/// Records sent emails. While failing, every send is rejected and nothing
/// is recorded.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Email>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, email: &Email) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("mail relay unavailable");
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// The DOCX renderer, switchable into a state where every render fails.
#[derive(Default)]
pub struct SwitchableRenderer {
    failing: AtomicBool,
}

impl SwitchableRenderer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Renderer for SwitchableRenderer {
    fn render(&self, project: &Project) -> anyhow::Result<Rendered> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("renderer out of order");
        }
        DocxRenderer.render(project)
    }
}

pub fn fast_settings() -> Settings {
    Settings {
        retry_backoff_ms: 0,
        finishing_delay_ms: 0,
        webhook_token: Some("hook-secret".to_owned()),
        admin_token: Some("admin-secret".to_owned()),
        public_base_url: "http://books.test".to_owned(),
        ..Settings::default()
    }
}

pub struct Harness {
    pub services: Services,
    pub generator: Arc<ScriptedGenerator>,
    pub notifier: Arc<RecordingNotifier>,
    pub renderer: Arc<SwitchableRenderer>,
    pub blobs: Arc<LocalFsBlobStore>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let renderer = Arc::new(SwitchableRenderer::default());
        let blobs = Arc::new(
            LocalFsBlobStore::new(dir.path().join("blobs"))
                .with_public_base_url(settings.public_base_url.clone()),
        );
        let services = Services::with_components(
            settings,
            Ledger::in_memory(),
            Collaborators {
                generator: generator.clone(),
                renderer: renderer.clone(),
                blobs: blobs.clone(),
                notifier: notifier.clone(),
            },
        );
        Self {
            services,
            generator,
            notifier,
            renderer,
            blobs,
            _dir: dir,
        }
    }

    pub async fn funded(credits: i64) -> Self {
        let harness = Self::new();
        harness
            .services
            .entitlement
            .grant_credit(EMAIL, credits)
            .await
            .unwrap();
        harness
    }

    pub async fn project(&self, id: &str) -> Project {
        self.services.pipeline.get(id).await.unwrap()
    }

    /// Runs research and structure for a fresh project, leaving it in
    /// REVIEW_STRUCTURE.
    pub async fn project_under_review(&self) -> Project {
        let pipeline = &self.services.pipeline;
        let project = pipeline.create(new_project("Hortas urbanas")).await.unwrap();
        pipeline
            .start_research(&project.id)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        pipeline
            .select_title(&project.id, "Hortas em Casa", "Do vaso à colheita")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        self.project(&project.id).await
    }
}

pub fn new_project(topic: &str) -> NewProject {
    NewProject {
        topic: topic.to_owned(),
        email: EMAIL.to_owned(),
        name: "Ana".to_owned(),
        ..NewProject::default()
    }
}
