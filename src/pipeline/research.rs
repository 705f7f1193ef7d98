use std::sync::Arc;

use serde::Deserialize;

use super::{Decision, Kickoff, Pipeline, invalid_state, prompts};
use crate::error::{Error, Result};
use crate::generation::{GenerationError, Task, generate_json};
use crate::project::{Chapter, Project, ProjectStatus, Stage, TitleOption};

/// One research sub-step. `degrade` steps fall back to a placeholder when
/// generation fails; the others fail the stage.
struct ResearchStep {
    task: Task,
    heading: &'static str,
    progress: u8,
    message: &'static str,
    degrade: bool,
}

const RESEARCH_STEPS: [ResearchStep; 3] = [
    ResearchStep {
        task: Task::VideoResearch,
        heading: "## Pesquisa de vídeos",
        progress: 5,
        message: "Pesquisando vídeos sobre o tema...",
        degrade: true,
    },
    ResearchStep {
        task: Task::WebResearch,
        heading: "## Pesquisa na web",
        progress: 10,
        message: "Pesquisando artigos e referências...",
        degrade: false,
    },
    ResearchStep {
        task: Task::CompetitorResearch,
        heading: "## Análise de concorrentes",
        progress: 15,
        message: "Analisando livros concorrentes...",
        degrade: true,
    },
];

pub const INTRODUCTION_TITLE: &str = "Introdução";

#[derive(Debug, Deserialize)]
struct TitleSuggestions {
    titles: Vec<TitleOption>,
}

#[derive(Debug, Deserialize)]
struct Outline {
    chapters: Vec<OutlineEntry>,
}

#[derive(Debug, Deserialize)]
struct OutlineEntry {
    title: String,
    #[serde(default, alias = "description")]
    intro: String,
}

fn research_decision(project: &Project) -> Result<Decision> {
    Ok(match project.status() {
        ProjectStatus::Idle | ProjectStatus::Researching => Decision::Start,
        ProjectStatus::Failed if project.metadata.failed_stage == Some(Stage::Research) => {
            Decision::Start
        }
        other => Decision::Skip(other),
    })
}

fn structure_decision(project: &Project) -> Result<Decision> {
    match project.status() {
        ProjectStatus::WaitingTitle | ProjectStatus::GeneratingStructure => Ok(Decision::Start),
        ProjectStatus::Failed if project.metadata.failed_stage == Some(Stage::Structure) => {
            Ok(Decision::Start)
        }
        ProjectStatus::Idle | ProjectStatus::Researching => {
            Err(invalid_state(project, "select a title for"))
        }
        other => Ok(Decision::Skip(other)),
    }
}

impl Pipeline {
    /// Starts research. Repeated calls while research runs or after it
    /// finished are no-ops. A draft created without a credit is charged
    /// here; without a credit or the payment bypass it fails with
    /// `PaymentRequired`. The charge is refunded when the run does not start.
    pub async fn start_research(self: &Arc<Self>, id: &str) -> Result<Kickoff> {
        let project = self.projects.get(id).await?;
        let charge = if project.status() == ProjectStatus::Idle && !project.metadata.entitled {
            Some(self.entitlement.consume_credit(project.email()).await?)
        } else {
            None
        };

        let kickoff = self
            .kick(id, Stage::Research, research_decision, |project| {
                if charge.is_some() {
                    project.metadata.entitled = true;
                }
                project.set_progress(ProjectStatus::Researching, 2, "Iniciando pesquisa...");
            })
            .await;

        if let Some(consumed) = charge
            && !consumed.bypassed
            && !matches!(kickoff, Ok(Kickoff::Started(_)))
        {
            tracing::info!(project_id = id, "research did not start; refunding draft charge");
            if let Err(err) = self.entitlement.grant_credit(project.email(), 1).await {
                tracing::error!(project_id = id, err = ?err, "refund draft charge failed");
            }
        }
        kickoff
    }

    /// Records the chosen title and starts structure generation.
    pub async fn select_title(
        self: &Arc<Self>,
        id: &str,
        title: &str,
        sub_title: &str,
    ) -> Result<Kickoff> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("title is required"));
        }
        let sub_title = sub_title.trim();

        self.kick(id, Stage::Structure, structure_decision, |project| {
            project.metadata.book_title = title.to_owned();
            project.metadata.sub_title = sub_title.to_owned();
            project.set_progress(
                ProjectStatus::GeneratingStructure,
                22,
                "Gerando a estrutura do livro...",
            );
        })
        .await
    }

    pub(super) async fn run_research(&self, id: &str) -> Result<()> {
        const STAGE: ProjectStatus = ProjectStatus::Researching;

        for step in &RESEARCH_STEPS {
            let project = self.projects.get(id).await?;
            if project.research_context.contains(step.heading) {
                tracing::debug!(project_id = id, task = %step.task, "research step already done");
                continue;
            }
            self.report(id, STAGE, STAGE, step.progress, step.message).await?;

            let prompt = prompts::research(step.task, &project.metadata);
            let text = match self.generator.generate_text(&prompt).await {
                Ok(text) => text,
                Err(err) if step.degrade => {
                    tracing::warn!(project_id = id, task = %step.task, err = %err, "research step degraded");
                    "(Pesquisa indisponível no momento; seguindo com o conhecimento geral do tema.)"
                        .to_owned()
                }
                Err(err) => return Err(err.into()),
            };

            let section = format!("{}\n{}\n\n", step.heading, text.trim());
            self.stage_update(id, STAGE, |project| {
                project.research_context.push_str(&section);
            })
            .await?;
        }

        let project = self.projects.get(id).await?;
        if project.title_options.is_empty() {
            self.report(id, STAGE, STAGE, 18, "Gerando opções de título...")
                .await?;
            let suggestions: TitleSuggestions =
                generate_json(self.generator.as_ref(), &prompts::title_options(&project)).await?;
            let options: Vec<TitleOption> = suggestions
                .titles
                .into_iter()
                .filter(|t| !t.title.trim().is_empty())
                .collect();
            if options.is_empty() {
                return Err(GenerationError::Empty.into());
            }
            self.stage_update(id, STAGE, |project| {
                project.title_options = options.clone();
            })
            .await?;
        }

        self.report(
            id,
            STAGE,
            ProjectStatus::WaitingTitle,
            20,
            "Pesquisa concluída. Escolha um título.",
        )
        .await?;
        tracing::info!(project_id = id, "research finished");
        Ok(())
    }

    pub(super) async fn run_structure(&self, id: &str) -> Result<()> {
        const STAGE: ProjectStatus = ProjectStatus::GeneratingStructure;

        let project = self.projects.get(id).await?;
        let body_chapters = self.options.chapter_count.saturating_sub(1).max(1);
        let outline: Outline = generate_json(
            self.generator.as_ref(),
            &prompts::structure(&project, body_chapters),
        )
        .await?;
        let structure = normalize_outline(outline, body_chapters)?;

        self.stage_update(id, STAGE, |project| {
            project.structure = structure.clone();
            project.set_progress(
                ProjectStatus::ReviewStructure,
                25,
                "Estrutura pronta. Revise os capítulos.",
            );
        })
        .await?;
        tracing::info!(project_id = id, chapters = structure.len(), "structure generated");
        Ok(())
    }
}

/// Builds the chapter list: introduction at id 0, then exactly
/// `body_chapters` chapters. Short outlines are padded, long ones cut.
fn normalize_outline(outline: Outline, body_chapters: usize) -> Result<Vec<Chapter>> {
    let entries: Vec<OutlineEntry> = outline
        .chapters
        .into_iter()
        .filter(|e| !e.title.trim().is_empty())
        .filter(|e| !e.title.trim().eq_ignore_ascii_case(INTRODUCTION_TITLE))
        .collect();
    if entries.is_empty() {
        return Err(GenerationError::Malformed("outline has no chapters".to_owned()).into());
    }
    if entries.len() != body_chapters {
        tracing::warn!(
            got = entries.len(),
            want = body_chapters,
            "outline length mismatch; normalizing"
        );
    }

    let mut structure = vec![Chapter {
        id: 0,
        title: INTRODUCTION_TITLE.to_owned(),
        intro: "Apresentação do livro e do que o leitor vai encontrar.".to_owned(),
        content: String::new(),
        is_generated: false,
    }];
    let mut entries = entries.into_iter();
    for n in 1..=body_chapters {
        let (title, intro) = match entries.next() {
            Some(entry) => (entry.title.trim().to_owned(), entry.intro.trim().to_owned()),
            None => (format!("Capítulo {n}"), String::new()),
        };
        structure.push(Chapter {
            id: u32::try_from(n).map_err(|_| Error::validation("too many chapters"))?,
            title,
            intro,
            content: String::new(),
            is_generated: false,
        });
    }
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline(titles: &[&str]) -> Outline {
        Outline {
            chapters: titles
                .iter()
                .map(|t| OutlineEntry {
                    title: (*t).to_owned(),
                    intro: String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn outline_is_padded_to_the_configured_length() {
        let structure = normalize_outline(outline(&["Um", "Dois"]), 4).unwrap();
        let titles: Vec<_> = structure.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Introdução", "Um", "Dois", "Capítulo 3", "Capítulo 4"]);
        assert_eq!(structure.last().map(|c| c.id), Some(4));
    }

    #[test]
    fn outline_drops_model_introduction_and_extra_chapters() {
        let structure = normalize_outline(outline(&["Introdução", "A", "B", "C"]), 2).unwrap();
        let titles: Vec<_> = structure.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Introdução", "A", "B"]);
    }

    #[test]
    fn empty_outline_is_malformed() {
        let err = normalize_outline(outline(&["  "]), 3).unwrap_err();
        assert_eq!(err.code(), "GENERATION_FAILED");
    }
}
