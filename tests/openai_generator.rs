mod openai_stub;

use bookforge::generation::{
    GenerationError, Generator as _, OpenAiGenerator, Prompt, Task, generate_json,
};
use openai_stub::{OpenAiStub, StubReply};
use serde::Deserialize;

fn generator(stub: &OpenAiStub, model: &str) -> OpenAiGenerator {
    OpenAiGenerator::new(&stub.base_url, "sk-test", model, 0.4)
}

#[tokio::test]
async fn sends_responses_request_and_returns_output_text() {
    let stub = OpenAiStub::spawn(StubReply::Text("Capítulo pronto.".to_owned()));
    let prompt = Prompt::new(Task::Chapter, "Escreva o capítulo 3.")
        .with_system("Você é um escritor.")
        .for_chapter(3);

    let text = generator(&stub, "gpt-4o-mini")
        .generate_text(&prompt)
        .await
        .unwrap();
    assert_eq!(text, "Capítulo pronto.");

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(request.body["model"], "gpt-4o-mini");
    assert_eq!(request.body["instructions"], "Você é um escritor.");
    assert_eq!(request.body["input"], "Escreva o capítulo 3.");
    assert_eq!(request.body["store"], false);
    assert_eq!(
        request.body.pointer("/text/format/type").and_then(|v| v.as_str()),
        Some("text")
    );
}

#[tokio::test]
async fn json_prompts_ask_for_json_objects() {
    #[derive(Debug, Deserialize)]
    struct Titles {
        titles: Vec<String>,
    }

    let stub = OpenAiStub::spawn(StubReply::Text(r#"{"titles": ["A", "B"]}"#.to_owned()));
    let parsed: Titles = generate_json(
        &generator(&stub, "gpt-5-mini"),
        &Prompt::new(Task::TitleOptions, "Sugira títulos."),
    )
    .await
    .unwrap();
    assert_eq!(parsed.titles, vec!["A", "B"]);

    let request = &stub.requests()[0];
    assert_eq!(
        request.body.pointer("/text/format/type").and_then(|v| v.as_str()),
        Some("json_object")
    );
    assert!(request.body.get("temperature").is_none());
}

#[tokio::test]
async fn api_errors_surface_the_provider_message() {
    let stub = OpenAiStub::spawn(StubReply::Error {
        status: 429,
        message: "Rate limit reached".to_owned(),
    });
    let err = generator(&stub, "gpt-4o-mini")
        .generate_text(&Prompt::new(Task::Marketing, "m"))
        .await
        .unwrap_err();
    match err {
        GenerationError::Provider(message) => {
            assert!(message.contains("429"), "{message}");
            assert!(message.contains("Rate limit reached"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn responses_without_text_are_empty() {
    let stub = OpenAiStub::spawn(StubReply::Empty);
    let err = generator(&stub, "gpt-4o-mini")
        .generate_text(&Prompt::new(Task::Chapter, "c"))
        .await
        .unwrap_err();
    assert_eq!(err, GenerationError::Empty);
}

#[tokio::test]
async fn unreachable_provider_is_a_provider_error() {
    let generator = OpenAiGenerator::new("http://127.0.0.1:9/v1", "sk-test", "gpt-4o-mini", 0.4);
    let err = generator
        .generate_text(&Prompt::new(Task::Chapter, "c"))
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Provider(_)), "{err:?}");
}

#[tokio::test]
async fn translation_text_is_taken_between_markers() {
    let stub = OpenAiStub::spawn(StubReply::EchoMarked {
        prefix: "EN: ".to_owned(),
    });
    let text = generator(&stub, "gpt-4o-mini")
        .generate_text(&Prompt::new(
            Task::Translation,
            "Traduza.\n\nBEGIN_TEXT\nOlá\nEND_TEXT",
        ))
        .await
        .unwrap();
    assert_eq!(text, "EN: Olá");
}
