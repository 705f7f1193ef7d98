use crate::generation::{Prompt, Task};
use crate::project::{Chapter, Metadata, Project};

pub const TEXT_BEGIN: &str = "BEGIN_TEXT\n";
pub const TEXT_END: &str = "\nEND_TEXT";

/// Research context is cut to this many characters when quoted in later
/// prompts.
const CONTEXT_CHARS: usize = 6_000;

fn system(meta: &Metadata) -> String {
    format!(
        "Você é um escritor profissional de livros de não ficção. Escreva sempre no idioma {}. \
         Não use markdown de código nem comentários sobre a tarefa.",
        meta.language
    )
}

fn truncated(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn research(task: Task, meta: &Metadata) -> Prompt {
    let focus = match task {
        Task::VideoResearch => {
            "Liste os temas, dúvidas e abordagens mais populares em vídeos sobre o assunto."
        }
        Task::WebResearch => {
            "Resuma o que os melhores artigos e guias dizem sobre o assunto: conceitos-chave, \
             dados relevantes e erros comuns."
        }
        _ => "Analise livros concorrentes sobre o assunto: promessas, lacunas e oportunidades.",
    };
    Prompt::new(task, format!("Tema do livro: {}\n\n{focus}", meta.topic)).with_system(system(meta))
}

pub fn title_options(project: &Project) -> Prompt {
    let meta = &project.metadata;
    Prompt::new(
        Task::TitleOptions,
        format!(
            "Tema: {}\n\nPesquisa:\n{}\n\nSugira 5 opções de título e subtítulo comerciais. \
             Responda apenas com JSON no formato \
             {{\"titles\": [{{\"title\": \"...\", \"subTitle\": \"...\"}}]}}.",
            meta.topic,
            truncated(&project.research_context, CONTEXT_CHARS)
        ),
    )
    .with_system(system(meta))
    .expect_json()
}

pub fn structure(project: &Project, body_chapters: usize) -> Prompt {
    let meta = &project.metadata;
    Prompt::new(
        Task::Structure,
        format!(
            "Título: {}\nSubtítulo: {}\nTema: {}\n\nPesquisa:\n{}\n\n\
             Crie o sumário com exatamente {body_chapters} capítulos (sem contar a introdução). \
             Para cada capítulo, um título e uma frase de orientação. Responda apenas com JSON \
             no formato {{\"chapters\": [{{\"title\": \"...\", \"intro\": \"...\"}}]}}.",
            meta.book_title,
            meta.sub_title,
            meta.topic,
            truncated(&project.research_context, CONTEXT_CHARS)
        ),
    )
    .with_system(system(meta))
    .expect_json()
}

pub fn chapter(project: &Project, chapter: &Chapter) -> Prompt {
    let meta = &project.metadata;
    let outline = outline(project);
    Prompt::new(
        Task::Chapter,
        format!(
            "Livro: {} ({})\n\nSumário:\n{outline}\n\nEscreva o capítulo \"{}\" por completo. \
             Orientação: {}\n\nUse subtítulos com ## quando fizer sentido.",
            meta.book_title, meta.sub_title, chapter.title, chapter.intro
        ),
    )
    .with_system(system(meta))
    .for_chapter(chapter.id)
}

pub fn introduction(project: &Project, chapter: &Chapter) -> Prompt {
    let meta = &project.metadata;
    let outline = outline(project);
    Prompt::new(
        Task::Introduction,
        format!(
            "Livro: {} ({})\n\nSumário:\n{outline}\n\nEscreva a introdução do livro: apresente a \
             promessa, para quem é o livro e como os capítulos se conectam.",
            meta.book_title, meta.sub_title
        ),
    )
    .with_system(system(meta))
    .for_chapter(chapter.id)
}

pub fn front_matter(project: &Project, part: &str) -> Prompt {
    let meta = &project.metadata;
    let author = if meta.author_name.is_empty() {
        "o autor"
    } else {
        meta.author_name.as_str()
    };
    Prompt::new(
        Task::FrontMatter,
        format!(
            "Escreva a seção \"{part}\" do livro \"{}\" em nome de {author}. \
             Tom pessoal, no máximo três parágrafos curtos.",
            meta.book_title
        ),
    )
    .with_system(system(meta))
}

pub fn marketing(project: &Project) -> Prompt {
    let meta = &project.metadata;
    Prompt::new(
        Task::Marketing,
        format!(
            "Livro: {} ({})\nAutor: {}\n\nSumário:\n{}\n\nCrie os textos de divulgação. Responda \
             apenas com JSON no formato {{\"synopsis\": \"...\", \"backCover\": \"...\", \
             \"flap\": \"...\", \"youtubeDescription\": \"...\", \"keywords\": [\"...\"]}}.",
            meta.book_title,
            meta.sub_title,
            meta.author_name,
            outline(project)
        ),
    )
    .with_system(system(meta))
    .expect_json()
}

pub fn translation(meta: &Metadata, language: &str, text: &str, chapter: Option<u32>) -> Prompt {
    let prompt = Prompt::new(
        Task::Translation,
        format!(
            "Traduza o texto abaixo para o idioma {language}, preservando parágrafos e \
             subtítulos. Responda apenas com a tradução.\n\n{TEXT_BEGIN}{text}{TEXT_END}"
        ),
    )
    .with_system(system(meta));
    match chapter {
        Some(id) => prompt.for_chapter(id),
        None => prompt,
    }
}

fn outline(project: &Project) -> String {
    let mut chapters: Vec<&Chapter> = project.structure.iter().collect();
    chapters.sort_by_key(|c| c.id);
    chapters
        .iter()
        .map(|c| format!("{}. {}", c.id, c.title))
        .collect::<Vec<_>>()
        .join("\n")
}
