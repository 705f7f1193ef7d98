//! Production Pipeline: drives a project from creation through research,
//! structure, writing and marketing to delivery.
//!
//! Stage transitions are validated and recorded synchronously; the
//! generation work itself runs as a background task on the [`TaskQueue`],
//! so callers poll project state instead of awaiting completion.

pub mod delivery;
pub mod prompts;
pub mod research;
pub mod translate;
pub mod writing;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::app::blob_store::BlobStore;
use crate::app::notifier::Notifier;
use crate::app::queue::TaskQueue;
use crate::config::Settings;
use crate::entitlement::EntitlementService;
use crate::error::{Error, Result};
use crate::generation::{Generator, TimeoutGenerator};
use crate::ledger::Ledger;
use crate::ledger::keys::is_plausible_email;
use crate::ledger::repos::ProjectRepository;
use crate::project::{NewProject, Project, ProjectStatus, Stage};
use crate::render::Renderer;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Structure length, introduction included.
    pub chapter_count: usize,
    pub chapter_attempts: usize,
    pub retry_backoff: Duration,
    pub finishing_delay: Duration,
    pub min_chapter_chars: usize,
    pub generation_timeout: Duration,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chapter_count: settings.chapter_count.max(2),
            chapter_attempts: settings.chapter_attempts.max(1),
            retry_backoff: settings.retry_backoff(),
            finishing_delay: settings.finishing_delay(),
            min_chapter_chars: settings.min_chapter_chars,
            generation_timeout: settings.generation_timeout(),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// External capabilities the pipeline calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub renderer: Arc<dyn Renderer>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Outcome of a stage transition request.
#[derive(Debug)]
pub enum Kickoff {
    /// The stage was accepted and runs in the background.
    Started(JoinHandle<()>),
    /// Nothing to do: the project is already at or past the stage, or a
    /// run for it is in flight.
    Skipped { status: ProjectStatus },
}

impl Kickoff {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    /// Waits for the background run, if any, to finish.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self {
            Self::Started(handle) => handle.await.context("join pipeline task"),
            Self::Skipped { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Start,
    Skip(ProjectStatus),
}

/// Keys of runs in flight in this process. A ticket frees its key on drop,
/// so a crashed or finished run never blocks a later resume.
#[derive(Debug, Clone, Default)]
struct RunGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunGuard {
    fn try_acquire(&self, key: String) -> Option<RunTicket> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return None;
        }
        Some(RunTicket {
            key,
            active: Arc::clone(&self.active),
        })
    }
}

#[derive(Debug)]
struct RunTicket {
    key: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Chapter outline edits accepted while the structure is under review.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterEdit {
    pub id: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub intro: Option<String>,
}

/// Final details collected before delivery.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsUpdate {
    pub author_name: Option<String>,
    pub book_title: Option<String>,
    pub sub_title: Option<String>,
    pub dedication: Option<String>,
    pub acknowledgments: Option<String>,
    pub about_author: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
}

pub struct Pipeline {
    projects: ProjectRepository,
    entitlement: EntitlementService,
    generator: Arc<dyn Generator>,
    renderer: Arc<dyn Renderer>,
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
    queue: TaskQueue,
    options: PipelineOptions,
    runs: RunGuard,
}

impl Pipeline {
    pub fn new(
        ledger: Ledger,
        entitlement: EntitlementService,
        collaborators: Collaborators,
        queue: TaskQueue,
        options: PipelineOptions,
    ) -> Self {
        let generator: Arc<dyn Generator> = Arc::new(TimeoutGenerator::new(
            collaborators.generator,
            options.generation_timeout,
        ));
        Self {
            projects: ProjectRepository::new(ledger),
            entitlement,
            generator,
            renderer: collaborators.renderer,
            blobs: collaborators.blobs,
            notifier: collaborators.notifier,
            queue,
            options,
            runs: RunGuard::default(),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn projects(&self) -> &ProjectRepository {
        &self.projects
    }

    pub async fn get(&self, id: &str) -> Result<Project> {
        self.projects.get(id).await
    }

    /// Creates a project for a paying user.
    ///
    /// When the email already has a non-terminal project of the same kind
    /// (generated vs pre-written), that project is returned unchanged and no
    /// credit is taken. Otherwise one credit is consumed; without one the
    /// call fails with `PaymentRequired` and a PENDING lead is recorded.
    pub async fn create(&self, request: NewProject) -> Result<Project> {
        validate_new_project(&request)?;

        let existing = self.projects.for_email(&request.email).await?;
        if let Some(project) = existing.into_iter().find(|p| {
            !p.status().is_terminal() && p.metadata.pre_written == request.pre_written
        }) {
            tracing::info!(project_id = %project.id, status = %project.status(), "resuming existing project");
            return Ok(project);
        }

        let consumed = match self.entitlement.consume_credit(&request.email).await {
            Ok(consumed) => consumed,
            Err(err @ Error::PaymentRequired { .. }) => {
                self.entitlement
                    .ensure_pending_lead(&request.email, &request.name)
                    .await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let project = Project::new(&request, true);
        match self.projects.insert(project).await {
            Ok(project) => {
                tracing::info!(project_id = %project.id, remaining = consumed.remaining, "project created");
                Ok(project)
            }
            Err(err) => {
                if !consumed.bypassed
                    && let Err(refund_err) = self.entitlement.grant_credit(&request.email, 1).await
                {
                    tracing::error!(err = ?refund_err, "refund after failed project insert failed");
                }
                Err(err)
            }
        }
    }

    /// Creates a draft project without charging. Entitlement is checked
    /// again when research starts.
    pub async fn create_for_admin(&self, request: NewProject) -> Result<Project> {
        validate_new_project(&request)?;
        let project = self.projects.insert(Project::new(&request, false)).await?;
        tracing::info!(project_id = %project.id, "draft project created");
        Ok(project)
    }

    /// Explicit status change requested by a caller. COMPLETED runs the
    /// completion side effects; FAILED aborts the current stage so it can be
    /// resumed later.
    pub async fn update_status(&self, id: &str, status: ProjectStatus) -> Result<Project> {
        match status {
            ProjectStatus::Completed => self.complete(id).await,
            ProjectStatus::Failed => {
                self.projects
                    .update(id, |project| {
                        let current = project.status();
                        if current.is_terminal() {
                            return Err(invalid_state(project, "abort"));
                        }
                        project.fail(resume_stage(current), "Interrompido manualmente");
                        Ok(())
                    })
                    .await?;
                self.projects.get(id).await
            }
            other => Err(Error::validation(format!(
                "status {other} cannot be set directly"
            ))),
        }
    }

    pub async fn update_structure(&self, id: &str, edits: Vec<ChapterEdit>) -> Result<Project> {
        self.projects
            .update(id, |project| {
                if project.status() != ProjectStatus::ReviewStructure {
                    return Err(invalid_state(project, "edit the structure of"));
                }
                for edit in &edits {
                    let chapter = project.chapter_mut(edit.id).ok_or_else(|| {
                        Error::validation(format!("unknown chapter id {}", edit.id))
                    })?;
                    if let Some(title) = non_blank(edit.title.as_deref()) {
                        chapter.title = title;
                    }
                    if let Some(intro) = edit.intro.as_deref() {
                        chapter.intro = intro.trim().to_owned();
                    }
                }
                Ok(())
            })
            .await?;
        self.projects.get(id).await
    }

    pub async fn update_details(&self, id: &str, details: DetailsUpdate) -> Result<Project> {
        self.projects
            .update(id, |project| {
                if !matches!(
                    project.status(),
                    ProjectStatus::WaitingDetails | ProjectStatus::Completed
                ) {
                    return Err(invalid_state(project, "edit the details of"));
                }
                let meta = &mut project.metadata;
                if let Some(v) = non_blank(details.author_name.as_deref()) {
                    meta.author_name = v;
                }
                if let Some(v) = non_blank(details.book_title.as_deref()) {
                    meta.book_title = v;
                }
                if let Some(v) = details.sub_title.as_deref() {
                    meta.sub_title = v.trim().to_owned();
                }
                if let Some(v) = details.dedication.as_deref() {
                    meta.dedication = Some(v.trim().to_owned());
                }
                if let Some(v) = details.acknowledgments.as_deref() {
                    meta.acknowledgments = Some(v.trim().to_owned());
                }
                if let Some(v) = details.about_author.as_deref() {
                    meta.about_author = Some(v.trim().to_owned());
                }
                if let Some(v) = non_blank(details.contact_name.as_deref()) {
                    meta.contact.name = v;
                }
                if let Some(v) = non_blank(details.contact_phone.as_deref()) {
                    meta.contact.phone = Some(v);
                }
                Ok(())
            })
            .await?;
        self.projects.get(id).await
    }

    /// Accepts a stage transition and spawns its background run.
    async fn kick<D, P>(
        self: &Arc<Self>,
        id: &str,
        stage: Stage,
        decide: D,
        mut prepare: P,
    ) -> Result<Kickoff>
    where
        D: Fn(&Project) -> Result<Decision>,
        P: FnMut(&mut Project),
    {
        let Some(ticket) = self.runs.try_acquire(id.to_owned()) else {
            let project = self.projects.get(id).await?;
            tracing::info!(project_id = id, %stage, "a run is already in flight; skipping");
            return Ok(Kickoff::Skipped {
                status: project.status(),
            });
        };

        let decision = self
            .projects
            .update(id, |project| {
                let decision = decide(project)?;
                if decision == Decision::Start {
                    project.metadata.failed_stage = None;
                    prepare(project);
                }
                Ok(decision)
            })
            .await?;

        match decision {
            Decision::Skip(status) => {
                tracing::info!(project_id = id, %stage, %status, "stage already done; skipping");
                Ok(Kickoff::Skipped { status })
            }
            Decision::Start => {
                tracing::info!(project_id = id, %stage, "stage started");
                Ok(Kickoff::Started(self.spawn_stage(stage, id.to_owned(), ticket)))
            }
        }
    }

    fn spawn_stage(self: &Arc<Self>, stage: Stage, id: String, ticket: RunTicket) -> JoinHandle<()> {
        let this = Arc::clone(self);
        self.queue.spawn(stage.as_str(), async move {
            let _ticket = ticket;
            let result = match stage {
                Stage::Research => this.run_research(&id).await,
                Stage::Structure => this.run_structure(&id).await,
                Stage::Writing => this.run_writing(&id).await,
            };
            if let Err(err) = result {
                tracing::error!(project_id = %id, %stage, err = ?err, "stage failed");
                this.mark_failed(&id, stage, &err).await;
            }
            Ok(())
        })
    }

    /// Records a stage failure so pollers see it and the stage can be
    /// re-invoked. A completed project is left alone.
    async fn mark_failed(&self, id: &str, stage: Stage, err: &Error) {
        let message = format!("Falha na etapa de {}: {err}", stage_label(stage));
        let result = self
            .projects
            .update(id, |project| {
                if project.status() != ProjectStatus::Completed {
                    project.fail(stage, message.clone());
                }
                Ok(())
            })
            .await;
        if let Err(err) = result {
            tracing::error!(project_id = id, %stage, err = ?err, "record stage failure failed");
        }
    }

    /// Mutates the project only while it is still in `expected`. A run whose
    /// project was moved on by someone else stops here.
    async fn stage_update<R, F>(&self, id: &str, expected: ProjectStatus, mut mutate: F) -> Result<R>
    where
        F: FnMut(&mut Project) -> R,
    {
        self.projects
            .update(id, |project| {
                if project.status() != expected {
                    return Err(invalid_state(project, "continue the running stage of"));
                }
                Ok(mutate(project))
            })
            .await
    }

    async fn report(
        &self,
        id: &str,
        expected: ProjectStatus,
        status: ProjectStatus,
        progress: u8,
        message: &str,
    ) -> Result<()> {
        self.stage_update(id, expected, |project| {
            project.set_progress(status, progress, message)
        })
        .await
    }
}

fn validate_new_project(request: &NewProject) -> Result<()> {
    if request.topic.trim().is_empty() {
        return Err(Error::validation("topic is required"));
    }
    if !is_plausible_email(&request.email) {
        return Err(Error::validation(format!("invalid email: {:?}", request.email)));
    }
    Ok(())
}

fn invalid_state(project: &Project, action: &'static str) -> Error {
    Error::InvalidState {
        project_id: project.id.clone(),
        status: project.status(),
        action,
    }
}

/// Stage to re-enter for a project aborted while in `status`.
fn resume_stage(status: ProjectStatus) -> Stage {
    match status {
        ProjectStatus::Idle | ProjectStatus::Researching => Stage::Research,
        ProjectStatus::WaitingTitle | ProjectStatus::GeneratingStructure => Stage::Structure,
        _ => Stage::Writing,
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Research => "pesquisa",
        Stage::Structure => "estrutura",
        Stage::Writing => "escrita",
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_guard_releases_on_drop() {
        let guard = RunGuard::default();
        let ticket = guard.try_acquire("p1".to_owned()).expect("first acquire");
        assert!(guard.try_acquire("p1".to_owned()).is_none());
        assert!(guard.try_acquire("p2".to_owned()).is_some());
        drop(ticket);
        assert!(guard.try_acquire("p1".to_owned()).is_some());
    }

    #[test]
    fn aborted_stages_resume_where_they_stopped() {
        assert_eq!(resume_stage(ProjectStatus::Idle), Stage::Research);
        assert_eq!(resume_stage(ProjectStatus::WaitingTitle), Stage::Structure);
        assert_eq!(resume_stage(ProjectStatus::ReviewStructure), Stage::Writing);
        assert_eq!(resume_stage(ProjectStatus::GeneratingMarketing), Stage::Writing);
    }
}
