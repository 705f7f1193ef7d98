use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Kickoff, Pipeline, RunTicket, invalid_state, prompts};
use crate::error::{Error, Result};
use crate::project::{Chapter, ProjectStatus, TranslationState, TranslationStatus};

fn run_key(id: &str, language: &str) -> String {
    format!("{id}:translate:{language}")
}

fn normalize_language(raw: &str) -> Result<String> {
    let language = raw.trim();
    let valid = !language.is_empty()
        && language.len() <= 16
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(Error::validation(format!("invalid language code: {raw:?}")));
    }
    Ok(language.to_owned())
}

fn progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(done * 100 / total).unwrap_or(100)
}

impl Pipeline {
    /// Starts a translation of the book into `language`. Runs next to the
    /// main pipeline and never changes the project status. A finished
    /// translation, or one already running, is not started again.
    pub async fn translate(self: &Arc<Self>, id: &str, language: &str) -> Result<Kickoff> {
        let language = normalize_language(language)?;
        let Some(ticket) = self.runs.try_acquire(run_key(id, &language)) else {
            let project = self.projects.get(id).await?;
            tracing::info!(project_id = id, language, "translation already running; skipping");
            return Ok(Kickoff::Skipped {
                status: project.status(),
            });
        };

        let started = self
            .projects
            .update(id, |project| {
                if !matches!(
                    project.status(),
                    ProjectStatus::WaitingDetails | ProjectStatus::Completed
                ) {
                    return Err(invalid_state(project, "translate"));
                }
                let translations = &mut project.metadata.translations;
                if let Some(state) = translations.get_mut(&language) {
                    if state.status == TranslationStatus::Completed {
                        return Ok(false);
                    }
                    state.status = TranslationStatus::InProgress;
                    state.error = None;
                } else {
                    translations.insert(
                        language.clone(),
                        TranslationState {
                            status: TranslationStatus::InProgress,
                            progress: 0,
                            book_title: None,
                            chapters: BTreeMap::new(),
                            error: None,
                        },
                    );
                }
                Ok(true)
            })
            .await?;

        let project = self.projects.get(id).await?;
        if !started {
            tracing::info!(project_id = id, language, "translation already completed");
            return Ok(Kickoff::Skipped {
                status: project.status(),
            });
        }

        tracing::info!(project_id = id, language, "translation started");
        Ok(Kickoff::Started(self.spawn_translation(
            id.to_owned(),
            language,
            ticket,
        )))
    }

    fn spawn_translation(
        self: &Arc<Self>,
        id: String,
        language: String,
        ticket: RunTicket,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        self.queue.spawn("translate", async move {
            let _ticket = ticket;
            if let Err(err) = this.run_translation(&id, &language).await {
                tracing::error!(project_id = %id, language, err = ?err, "translation failed");
                let message = err.to_string();
                let recorded = this
                    .projects
                    .update(&id, |project| {
                        if let Some(state) = project.metadata.translations.get_mut(&language) {
                            state.status = TranslationStatus::Failed;
                            state.error = Some(message.clone());
                        }
                        Ok(())
                    })
                    .await;
                if let Err(err) = recorded {
                    tracing::error!(project_id = %id, language, err = ?err, "record translation failure failed");
                }
            }
            Ok(())
        })
    }

    /// Title first, then chapters in id order. Chapters already translated
    /// are skipped; a chapter whose translation fails keeps its original
    /// text.
    async fn run_translation(&self, id: &str, language: &str) -> Result<()> {
        let project = self.projects.get(id).await?;
        let meta = &project.metadata;
        let existing = meta.translations.get(language).cloned();

        if existing.as_ref().is_none_or(|s| s.book_title.is_none()) && !meta.book_title.is_empty() {
            let title = match self
                .generator
                .generate_text(&prompts::translation(meta, language, &meta.book_title, None))
                .await
            {
                Ok(text) => text.trim().to_owned(),
                Err(err) => {
                    tracing::warn!(project_id = id, language, err = %err, "title translation failed; keeping original");
                    meta.book_title.clone()
                }
            };
            self.record_translation(id, language, |state| state.book_title = Some(title.clone()))
                .await?;
        }

        let mut chapters: Vec<&Chapter> = project.structure.iter().collect();
        chapters.sort_by_key(|c| c.id);
        let total = chapters.len();
        for (done, chapter) in chapters.into_iter().enumerate() {
            if existing
                .as_ref()
                .is_some_and(|s| s.chapters.contains_key(&chapter.id))
            {
                continue;
            }
            let text = if chapter.content.trim().is_empty() || chapter.is_placeholder() {
                chapter.content.clone()
            } else {
                let prompt = prompts::translation(meta, language, &chapter.content, Some(chapter.id));
                match self.generator.generate_text(&prompt).await {
                    Ok(text) => text.trim().to_owned(),
                    Err(err) => {
                        tracing::warn!(
                            project_id = id,
                            language,
                            chapter_id = chapter.id,
                            err = %err,
                            "chapter translation failed; keeping original"
                        );
                        chapter.content.clone()
                    }
                }
            };
            let chapter_id = chapter.id;
            self.record_translation(id, language, |state| {
                state.chapters.insert(chapter_id, text.clone());
                state.progress = progress(done + 1, total);
            })
            .await?;
        }

        self.record_translation(id, language, |state| {
            state.status = TranslationStatus::Completed;
            state.progress = 100;
        })
        .await?;
        tracing::info!(project_id = id, language, chapters = total, "translation finished");
        Ok(())
    }

    async fn record_translation<F>(&self, id: &str, language: &str, mut mutate: F) -> Result<()>
    where
        F: FnMut(&mut TranslationState),
    {
        self.projects
            .update(id, |project| {
                let state = project
                    .metadata
                    .translations
                    .get_mut(language)
                    .ok_or_else(|| Error::not_found("translation", language))?;
                mutate(state);
                Ok(())
            })
            .await
    }
}
