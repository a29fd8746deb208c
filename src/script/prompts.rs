//! Prompt builders for the draft and revision calls.

use super::interface::{CompletionRequest, Script, ScriptOptions};
use super::refine::RefineIssue;

const SCHEMA_HINT: &str = r#"Respond with a single JSON object and nothing else:
{"title": "...", "summary": "...", "segments": [{"speaker": "<host name>", "text": "..."}]}"#;

fn host_list(options: &ScriptOptions) -> String {
    options.hosts.join(", ")
}

pub fn generation_request(content: &str, options: &ScriptOptions) -> CompletionRequest {
    let mut system = format!(
        "You write scripts for an audio show in {} format with a {} tone. \
         The hosts are: {}. Every segment's speaker must be exactly one of those names. \
         Aim for about {} segments and {} words in total.",
        options.format,
        options.tone,
        host_list(options),
        options.length.target_segments(),
        options.length.target_words(),
    );
    if let Some(focus) = options.focus.as_deref().filter(|f| !f.trim().is_empty()) {
        system.push_str(&format!(" Focus the discussion on: {}.", focus));
    }
    if !options.style_tags.is_empty() {
        system.push_str(&format!(" Style: {}.", options.style_tags.join(", ")));
    }
    system.push_str("\n\n");
    system.push_str(SCHEMA_HINT);

    CompletionRequest {
        system,
        user: format!("Source material:\n\n{}", content),
        temperature: Some(0.7),
        max_tokens: None,
        json_mode: true,
    }
}

pub fn revision_request(
    draft: &Script,
    issues: &[RefineIssue],
    options: &ScriptOptions,
) -> CompletionRequest {
    let notes = issues
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n");
    let draft_json = serde_json::to_string_pretty(draft).unwrap_or_default();

    CompletionRequest {
        system: format!(
            "You edit scripts for an audio show. Keep the hosts ({}) and the facts. \
             Fix only the listed problems.\n\n{}",
            host_list(options),
            SCHEMA_HINT
        ),
        user: format!("Problems:\n{}\n\nDraft:\n{}", notes, draft_json),
        temperature: Some(0.4),
        max_tokens: None,
        json_mode: true,
    }
}
