use anyhow::Context as _;
use serde::Serialize;

use super::{Pipeline, invalid_state};
use crate::app::notifier::{Attachment, Email};
use crate::error::Result;
use crate::lead::LeadStatus;
use crate::project::{Project, ProjectStatus};
use crate::render::Rendered;

/// What the best-effort delivery steps achieved. Each step is attempted
/// even if an earlier one failed.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub artifact_url: Option<String>,
    pub emailed: bool,
    pub lead_marked: bool,
    pub errors: Vec<String>,
}

impl DeliveryReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn artifact_path(project: &Project, rendered: &Rendered) -> String {
    format!("projects/{}/{}", project.id, rendered.file_name)
}

impl Pipeline {
    /// Moves a project from WAITING_DETAILS to COMPLETED and delivers it.
    /// Completing an already completed project returns it unchanged and
    /// does not deliver a second time.
    pub async fn complete(&self, id: &str) -> Result<Project> {
        let transitioned = self
            .projects
            .update(id, |project| match project.status() {
                ProjectStatus::Completed => Ok(false),
                ProjectStatus::WaitingDetails => {
                    project.set_progress(ProjectStatus::Completed, 100, "Livro concluído!");
                    Ok(true)
                }
                _ => Err(invalid_state(project, "complete")),
            })
            .await?;
        if !transitioned {
            tracing::info!(project_id = id, "project already completed");
            return self.projects.get(id).await;
        }

        let project = self.projects.get(id).await?;
        let report = self.deliver_project(&project).await;
        if report.is_clean() {
            tracing::info!(project_id = id, "project completed and delivered");
        } else {
            tracing::warn!(project_id = id, errors = ?report.errors, "project completed; delivery incomplete");
        }
        self.projects.get(id).await
    }

    /// Re-runs delivery for a completed project.
    pub async fn deliver(&self, id: &str) -> Result<DeliveryReport> {
        let project = self.projects.get(id).await?;
        if project.status() != ProjectStatus::Completed {
            return Err(invalid_state(&project, "deliver"));
        }
        Ok(self.deliver_project(&project).await)
    }

    /// Renders and uploads a fresh artifact for this exact project. Errors
    /// are returned to the caller rather than absorbed.
    pub async fn regenerate(&self, id: &str) -> Result<Project> {
        let project = self.projects.get(id).await?;
        if !matches!(
            project.status(),
            ProjectStatus::WaitingDetails | ProjectStatus::Completed
        ) {
            return Err(invalid_state(&project, "regenerate the document of"));
        }

        let rendered = self.renderer.render(&project)?;
        let url = self
            .blobs
            .upload(
                &artifact_path(&project, &rendered),
                &rendered.bytes,
                &rendered.content_type,
            )
            .await
            .context("upload regenerated artifact")?;
        self.projects
            .update(id, |project| {
                project.metadata.artifact_url = url.clone();
                Ok(())
            })
            .await?;
        tracing::info!(project_id = id, size = rendered.bytes.len(), "artifact regenerated");
        self.projects.get(id).await
    }

    /// Render, upload, email and lead update. Nothing here rolls back the
    /// completion; failures are collected into the report.
    async fn deliver_project(&self, project: &Project) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let rendered = match self.renderer.render(project) {
            Ok(rendered) => Some(rendered),
            Err(err) => {
                tracing::error!(project_id = %project.id, err = ?err, "render failed");
                report.errors.push(format!("render: {err:#}"));
                None
            }
        };

        if let Some(rendered) = &rendered {
            match self
                .blobs
                .upload(
                    &artifact_path(project, rendered),
                    &rendered.bytes,
                    &rendered.content_type,
                )
                .await
            {
                Ok(url) => report.artifact_url = url,
                Err(err) => {
                    tracing::error!(project_id = %project.id, err = ?err, "artifact upload failed");
                    report.errors.push(format!("upload: {err:#}"));
                }
            }

            let email = delivery_email(project, rendered, report.artifact_url.as_deref());
            match self.notifier.send_email(&email).await {
                Ok(()) => report.emailed = true,
                Err(err) => {
                    tracing::error!(project_id = %project.id, err = ?err, "delivery email failed");
                    report.errors.push(format!("email: {err:#}"));
                }
            }
        }

        // The lead only reads LIVRO ENTREGUE once the book reached the reader.
        if rendered.is_some() && report.emailed {
            report.lead_marked = self
                .entitlement
                .mark_lead(project.email(), LeadStatus::Delivered)
                .await;
        } else {
            tracing::warn!(project_id = %project.id, "delivery incomplete; lead left unchanged");
        }

        let artifact_url = report.artifact_url.clone();
        let emailed = report.emailed;
        let recorded = self
            .projects
            .update(&project.id, |project| {
                if artifact_url.is_some() {
                    project.metadata.artifact_url = artifact_url.clone();
                }
                if emailed {
                    project.metadata.delivered_at = Some(chrono::Utc::now());
                }
                Ok(())
            })
            .await;
        if let Err(err) = recorded {
            tracing::error!(project_id = %project.id, err = ?err, "record delivery failed");
            report.errors.push(format!("record: {err}"));
        }
        report
    }
}

fn delivery_email(project: &Project, rendered: &Rendered, url: Option<&str>) -> Email {
    let meta = &project.metadata;
    let title = if meta.book_title.is_empty() {
        meta.topic.as_str()
    } else {
        meta.book_title.as_str()
    };
    let greeting = if meta.contact.name.is_empty() {
        "Olá!".to_owned()
    } else {
        format!("Olá, {}!", meta.contact.name)
    };
    let mut body = format!("{greeting}\n\nSeu livro \"{title}\" está pronto e segue em anexo.");
    if let Some(url) = url {
        body.push_str(&format!("\n\nVocê também pode baixá-lo em: {url}"));
    }
    body.push_str("\n\nBoa leitura!");

    Email {
        to: project.email().to_owned(),
        subject: format!("Seu livro \"{title}\" está pronto"),
        body,
        attachments: vec![Attachment {
            file_name: rendered.file_name.clone(),
            content_type: rendered.content_type.clone(),
            bytes: rendered.bytes.clone(),
        }],
    }
}
