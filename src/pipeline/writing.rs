use std::sync::Arc;

use super::{Decision, Kickoff, Pipeline, invalid_state, prompts};
use crate::error::{Error, Result};
use crate::generation::{Prompt, generate_json};
use crate::project::{CHAPTER_ERROR_PREFIX, Chapter, Marketing, Project, ProjectStatus, Stage};

const WRITING_START: u8 = 25;
const WRITING_END: u8 = 80;

/// Cosmetic steps shown between marketing and WAITING_DETAILS.
const FINISHING_STEPS: [(&str, u8); 2] = [
    ("Revisando o texto...", 88),
    ("Diagramando o livro...", 92),
];

#[derive(Debug, Clone, Copy)]
enum FrontMatter {
    Dedication,
    Acknowledgments,
    AboutAuthor,
}

impl FrontMatter {
    const ALL: [FrontMatter; 3] = [Self::Dedication, Self::Acknowledgments, Self::AboutAuthor];

    fn label(self) -> &'static str {
        match self {
            Self::Dedication => "Dedicatória",
            Self::Acknowledgments => "Agradecimentos",
            Self::AboutAuthor => "Sobre o autor",
        }
    }

    fn placeholder(self) -> &'static str {
        match self {
            Self::Dedication => "[Escreva aqui a sua dedicatória]",
            Self::Acknowledgments => "[Escreva aqui os seus agradecimentos]",
            Self::AboutAuthor => "[Escreva aqui um breve texto sobre você]",
        }
    }

    fn slot(self, project: &mut Project) -> &mut Option<String> {
        let meta = &mut project.metadata;
        match self {
            Self::Dedication => &mut meta.dedication,
            Self::Acknowledgments => &mut meta.acknowledgments,
            Self::AboutAuthor => &mut meta.about_author,
        }
    }

    fn is_filled(self, project: &Project) -> bool {
        let meta = &project.metadata;
        let value = match self {
            Self::Dedication => &meta.dedication,
            Self::Acknowledgments => &meta.acknowledgments,
            Self::AboutAuthor => &meta.about_author,
        };
        value.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

fn writing_decision(project: &Project) -> Result<Decision> {
    match project.status() {
        ProjectStatus::ReviewStructure
        | ProjectStatus::WritingChapters
        | ProjectStatus::GeneratingMarketing => Ok(Decision::Start),
        ProjectStatus::Failed if project.metadata.failed_stage == Some(Stage::Writing) => {
            Ok(Decision::Start)
        }
        status @ (ProjectStatus::WaitingDetails
        | ProjectStatus::Completed
        | ProjectStatus::Failed) => Ok(Decision::Skip(status)),
        _ => Err(invalid_state(project, "write")),
    }
}

fn error_placeholder(reason: &str) -> String {
    format!(
        "{CHAPTER_ERROR_PREFIX} Não foi possível escrever este capítulo agora; \
         ele será refeito na próxima execução.]\n\n({reason})"
    )
}

impl Pipeline {
    /// Starts (or resumes) the writing stage: chapters, introduction,
    /// front matter, marketing and the finishing steps.
    pub async fn generate_content(self: &Arc<Self>, id: &str) -> Result<Kickoff> {
        let project = self.projects.get(id).await?;
        if project.structure.is_empty() {
            return Err(Error::validation("project has no structure to write"));
        }

        self.kick(id, Stage::Writing, writing_decision, |project| {
            if project.status() != ProjectStatus::GeneratingMarketing {
                project.set_progress(
                    ProjectStatus::WritingChapters,
                    WRITING_START,
                    "Iniciando a escrita...",
                );
            }
        })
        .await
    }

    pub(super) async fn run_writing(&self, id: &str) -> Result<()> {
        let project = self.projects.get(id).await?;

        if project.status() == ProjectStatus::WritingChapters {
            self.write_chapters(id, &project).await?;
            self.write_front_matter(id).await?;
            self.report(
                id,
                ProjectStatus::WritingChapters,
                ProjectStatus::GeneratingMarketing,
                82,
                "Gerando materiais de divulgação...",
            )
            .await?;
        }

        self.write_marketing(id).await?;

        const STAGE: ProjectStatus = ProjectStatus::GeneratingMarketing;
        for (message, progress) in FINISHING_STEPS {
            self.report(id, STAGE, STAGE, progress, message).await?;
            tokio::time::sleep(self.options.finishing_delay).await;
        }
        self.report(
            id,
            STAGE,
            ProjectStatus::WaitingDetails,
            95,
            "Seu livro está pronto! Complete os detalhes finais.",
        )
        .await?;
        tracing::info!(project_id = id, "writing finished");
        Ok(())
    }

    /// Body chapters in ascending id order, then the introduction. Chapters
    /// that already hold real content are left alone.
    async fn write_chapters(&self, id: &str, snapshot: &Project) -> Result<()> {
        const STAGE: ProjectStatus = ProjectStatus::WritingChapters;

        let mut order: Vec<&Chapter> = snapshot.structure.iter().filter(|c| c.id != 0).collect();
        order.sort_by_key(|c| c.id);
        order.extend(snapshot.structure.iter().filter(|c| c.id == 0));

        let total = order.len();
        for (done, chapter) in order.into_iter().enumerate() {
            if chapter.is_written(self.options.min_chapter_chars) {
                tracing::debug!(project_id = id, chapter_id = chapter.id, "chapter already written");
                continue;
            }

            let message = if chapter.id == 0 {
                "Escrevendo a introdução...".to_owned()
            } else {
                format!("Escrevendo capítulo {}/{}: {}", done + 1, total, chapter.title)
            };
            self.report(id, STAGE, STAGE, writing_progress(done, total), &message)
                .await?;

            // Prompts see the outline as it is now.
            let project = self.projects.get(id).await?;
            let prompt = if chapter.id == 0 {
                prompts::introduction(&project, chapter)
            } else {
                prompts::chapter(&project, chapter)
            };
            let content = self.write_with_retries(id, &prompt).await;

            let chapter_id = chapter.id;
            self.stage_update(id, STAGE, |project| {
                if let Some(chapter) = project.chapter_mut(chapter_id) {
                    chapter.content = content.clone();
                    chapter.is_generated = true;
                }
            })
            .await?;
        }
        Ok(())
    }

    /// Up to `chapter_attempts` tries with a fixed backoff in between. When
    /// every try fails, the error placeholder is returned instead.
    async fn write_with_retries(&self, id: &str, prompt: &Prompt) -> String {
        let attempts = self.options.chapter_attempts;
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.generator.generate_text(prompt).await {
                Ok(text) => return text.trim().to_owned(),
                Err(err) => {
                    tracing::warn!(
                        project_id = id,
                        chapter_id = ?prompt.chapter,
                        attempt,
                        err = %err,
                        "chapter generation failed"
                    );
                    last_err = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_backoff).await;
                    }
                }
            }
        }
        tracing::error!(project_id = id, chapter_id = ?prompt.chapter, "chapter retries exhausted; writing placeholder");
        let reason = last_err.map_or_else(|| "erro desconhecido".to_owned(), |e| e.to_string());
        error_placeholder(&reason)
    }

    /// Dedication, acknowledgments and about-the-author. PRO and BLACK plans
    /// get generated text; everyone else gets fill-in placeholders.
    async fn write_front_matter(&self, id: &str) -> Result<()> {
        const STAGE: ProjectStatus = ProjectStatus::WritingChapters;

        let project = self.projects.get(id).await?;
        let generated = match self.entitlement.plans().get(project.email()).await {
            Ok(plan) => plan.is_some_and(|p| p.is_active_at(chrono::Utc::now()) && p.name.writes_extras()),
            Err(err) => {
                tracing::warn!(project_id = id, err = ?err, "read plan failed; using placeholders");
                false
            }
        };

        for part in FrontMatter::ALL {
            if part.is_filled(&project) {
                continue;
            }
            let text = if generated {
                match self
                    .generator
                    .generate_text(&prompts::front_matter(&project, part.label()))
                    .await
                {
                    Ok(text) => text.trim().to_owned(),
                    Err(err) => {
                        tracing::warn!(project_id = id, part = part.label(), err = %err, "front matter degraded");
                        part.placeholder().to_owned()
                    }
                }
            } else {
                part.placeholder().to_owned()
            };
            self.stage_update(id, STAGE, |project| {
                *part.slot(project) = Some(text.clone());
            })
            .await?;
        }
        Ok(())
    }

    async fn write_marketing(&self, id: &str) -> Result<()> {
        const STAGE: ProjectStatus = ProjectStatus::GeneratingMarketing;

        let project = self.projects.get(id).await?;
        if project.marketing.is_some() {
            return Ok(());
        }
        let marketing = match generate_json::<Marketing>(
            self.generator.as_ref(),
            &prompts::marketing(&project),
        )
        .await
        {
            Ok(marketing) if !marketing.synopsis.trim().is_empty() => marketing,
            Ok(_) => fallback_marketing(&project),
            Err(err) => {
                tracing::warn!(project_id = id, err = %err, "marketing degraded to metadata copy");
                fallback_marketing(&project)
            }
        };
        self.stage_update(id, STAGE, |project| {
            project.marketing = Some(marketing.clone());
            project.metadata.progress = 86;
        })
        .await
    }
}

fn writing_progress(done: usize, total: usize) -> u8 {
    let span = usize::from(WRITING_END - WRITING_START);
    let step = if total == 0 { 0 } else { done * span / total };
    WRITING_START + u8::try_from(step).unwrap_or(WRITING_END - WRITING_START)
}

fn fallback_marketing(project: &Project) -> Marketing {
    let meta = &project.metadata;
    let title = if meta.book_title.is_empty() {
        meta.topic.as_str()
    } else {
        meta.book_title.as_str()
    };
    Marketing {
        synopsis: format!("{title}: {}", meta.sub_title),
        back_cover: format!("Um livro sobre {} para quem quer ir além.", meta.topic),
        flap: format!("{} escreveu este livro para compartilhar o que aprendeu.", meta.author_name),
        youtube_description: format!("Conheça \"{title}\", de {}.", meta.author_name),
        keywords: vec![meta.topic.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::NewProject;

    #[test]
    fn progress_spans_the_writing_band() {
        assert_eq!(writing_progress(0, 15), 25);
        assert_eq!(writing_progress(14, 15), 76);
        assert_eq!(writing_progress(15, 15), 80);
    }

    #[test]
    fn placeholder_is_recognized_as_unwritten() {
        let chapter = Chapter {
            id: 5,
            title: "C".to_owned(),
            intro: String::new(),
            content: error_placeholder("timeout"),
            is_generated: true,
        };
        assert!(chapter.is_placeholder());
        assert!(!chapter.is_written(0));
    }

    #[test]
    fn writing_is_skipped_once_done() {
        let mut project = Project::new(
            &NewProject {
                topic: "T".to_owned(),
                email: "a@b.com".to_owned(),
                ..NewProject::default()
            },
            true,
        );
        project.metadata.status = ProjectStatus::WaitingDetails;
        assert_eq!(
            writing_decision(&project).unwrap(),
            Decision::Skip(ProjectStatus::WaitingDetails)
        );
        project.metadata.status = ProjectStatus::WaitingTitle;
        assert!(writing_decision(&project).is_err());
        project.fail(Stage::Writing, "x");
        assert_eq!(writing_decision(&project).unwrap(), Decision::Start);
    }
}
