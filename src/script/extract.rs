//! Pull a script JSON object out of free-form model output.
//!
//! Models wrap their answer in reasoning blocks, markdown fences and chatty
//! preambles. We strip the first two and then take the first balanced JSON
//! object in what remains.

use super::interface::Script;
use regex::Regex;
use std::sync::OnceLock;

fn reasoning_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<think>.*?</think>|<thinking>.*?</thinking>|<reasoning>.*?</reasoning>",
        )
        .expect("static regex")
    })
}

/// Remove `<think>`-style reasoning blocks. A dangling closing tag (the
/// opening tag was swallowed by the provider) drops everything before it.
pub fn strip_reasoning(text: &str) -> String {
    let stripped = reasoning_block().replace_all(text, "");
    let lower = stripped.to_ascii_lowercase();
    for tag in ["</think>", "</thinking>", "</reasoning>"] {
        if let Some(pos) = lower.rfind(tag) {
            return stripped[pos + tag.len()..].to_string();
        }
    }
    stripped.into_owned()
}

/// Drop markdown fence lines (```json, ```), keeping their contents.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find the first balanced `{ ... }` object, respecting string literals and escapes.
pub fn first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[open..=i]);
                    }
                }
                _ => {}
            }
        }

        // Unbalanced from this brace; try the next one.
        start = open + 1;
    }
    None
}

/// Full extraction chain: reasoning → fences → first object → serde.
pub fn parse_script(raw: &str) -> Result<Script, String> {
    if raw.trim().is_empty() {
        return Err("empty response".to_string());
    }

    let cleaned = strip_code_fences(&strip_reasoning(raw));
    let object = first_json_object(&cleaned)
        .ok_or_else(|| "no JSON object found in response".to_string())?;

    serde_json::from_str::<Script>(object).map_err(|e| format!("unparsable script JSON: {}", e))
}
