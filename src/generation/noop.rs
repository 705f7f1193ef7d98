use async_trait::async_trait;

use super::{GenerationError, Generator, Prompt, Task};

const OUTLINE_LEN: usize = 20;

/// Deterministic offline backend. Produces well-formed output for every
/// task without touching the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGenerator;

#[async_trait]
impl Generator for NoopGenerator {
    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        Ok(match prompt.task {
            Task::VideoResearch | Task::WebResearch | Task::CompetitorResearch => format!(
                "Notas de pesquisa ({}): o público procura orientação prática, exemplos \
                 concretos e uma progressão clara do básico ao avançado.",
                prompt.task
            ),
            Task::TitleOptions => serde_json::json!({
                "titles": [
                    {"title": "O Guia Essencial", "subTitle": "Do primeiro passo ao domínio"},
                    {"title": "Método Prático", "subTitle": "Resultados reais em poucas semanas"},
                    {"title": "Sem Segredos", "subTitle": "Tudo o que ninguém te contou"}
                ]
            })
            .to_string(),
            Task::Structure => {
                let chapters: Vec<_> = (1..=OUTLINE_LEN)
                    .map(|n| {
                        serde_json::json!({
                            "title": format!("Capítulo {n}"),
                            "intro": format!("Pontos centrais da etapa {n}."),
                        })
                    })
                    .collect();
                serde_json::json!({ "chapters": chapters }).to_string()
            }
            Task::Chapter | Task::Introduction => body_text(prompt.chapter.unwrap_or(0)),
            Task::FrontMatter => {
                "Dedico este livro a todos que acreditam que aprender nunca é tarde.".to_owned()
            }
            Task::Marketing => serde_json::json!({
                "synopsis": "Um guia direto ao ponto para quem quer resultados.",
                "backCover": "Descubra um método testado, explicado passo a passo.",
                "flap": "O autor reúne anos de experiência prática neste livro.",
                "youtubeDescription": "Conheça o livro que simplifica o assunto.",
                "keywords": ["guia", "prático", "método"]
            })
            .to_string(),
            Task::Translation => {
                let text =
                    between(&prompt.user, "BEGIN_TEXT\n", "\nEND_TEXT").unwrap_or(&prompt.user);
                format!("[translated] {}", text.trim())
            }
        })
    }
}

fn between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let rest = &text[start..];
    Some(&rest[..rest.find(end)?])
}

fn body_text(chapter: u32) -> String {
    let paragraph = "Este trecho apresenta o tema com exemplos claros, conecta as ideias \
                     ao cotidiano do leitor e fecha com um exercício simples para fixar \
                     o aprendizado antes de seguir adiante.";
    let mut text = format!("Capítulo {chapter}\n\n");
    for _ in 0..3 {
        text.push_str(paragraph);
        text.push_str("\n\n");
    }
    text
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::generation::json::parse_lenient;

    #[tokio::test]
    async fn json_tasks_yield_parseable_objects() {
        for task in [Task::TitleOptions, Task::Structure, Task::Marketing] {
            let out = NoopGenerator
                .generate_text(&Prompt::new(task, "x").expect_json())
                .await
                .unwrap();
            assert!(parse_lenient::<Value>(&out).is_ok(), "{task}");
        }
    }

    #[tokio::test]
    async fn chapter_text_is_long_enough_to_count_as_written() {
        let out = NoopGenerator
            .generate_text(&Prompt::new(Task::Chapter, "x").for_chapter(4))
            .await
            .unwrap();
        assert!(out.chars().count() > 300);
    }
}
