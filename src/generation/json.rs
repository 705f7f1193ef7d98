use serde::de::DeserializeOwned;

use super::GenerationError;

/// Parses the first well-formed JSON object embedded in `text`, skipping
/// prose, code fences and unbalanced fragments around it.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<T, GenerationError> {
    if text.trim().is_empty() {
        return Err(GenerationError::Empty);
    }

    let mut last_err = None;
    for candidate in object_spans(text) {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok(value),
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(GenerationError::Malformed(match last_err {
        Some(err) => format!("no JSON object matched the expected shape: {err}"),
        None => "no JSON object found in output".to_owned(),
    }))
}

/// Balanced `{...}` spans in order of their opening brace, found in one
/// pass. Braces inside string literals are ignored; quotes in prose outside
/// any object are not treated as strings.
fn object_spans(text: &str) -> impl Iterator<Item = &str> {
    let mut open = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (pos, &b) in text.as_bytes().iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(pos),
            b'}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, pos));
                }
            }
            _ => {}
        }
    }
    spans.sort_unstable_by_key(|&(start, _)| start);
    spans.into_iter().map(move |(start, end)| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::Value;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Marketing {
        synopsis: String,
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let text = r#"Resultado: {"synopsis": "um livro {incrível} \"de fato\""} fim"#;
        let parsed: Marketing = parse_lenient(text).unwrap();
        assert_eq!(parsed.synopsis, r#"um livro {incrível} "de fato""#);
    }

    #[test]
    fn skips_objects_of_the_wrong_shape() {
        let text = r#"{"note": 1} and then {"synopsis": "ok"}"#;
        let parsed: Marketing = parse_lenient(text).unwrap();
        assert_eq!(parsed.synopsis, "ok");
    }

    #[test]
    fn wrapper_objects_fall_through_to_the_inner_shape() {
        let text = r#"```json
{"marketing": {"synopsis": "por dentro", "keywords": ["horta"]}}
```"#;
        let parsed: crate::project::Marketing = parse_lenient(text).unwrap();
        assert_eq!(parsed.synopsis, "por dentro");
        assert_eq!(parsed.keywords, vec!["horta".to_owned()]);
    }

    #[test]
    fn long_brace_heavy_output_still_parses() {
        let noise = "{ ".repeat(20_000);
        let text = format!(r#"{noise}{{"synopsis": "fim"}}"#);
        let parsed: Marketing = parse_lenient(&text).unwrap();
        assert_eq!(parsed.synopsis, "fim");
    }

    #[test]
    fn truncated_output_is_malformed() {
        let err = parse_lenient::<Value>(r#"{"synopsis": "cut of"#).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
        assert_eq!(parse_lenient::<Value>(" ").unwrap_err(), GenerationError::Empty);
    }
}
