use std::fmt;

use crate::error::{PipelineError, PipelineResult};

pub const MIN_PROMPT_CHARS: usize = 3;
pub const MAX_PROMPT_CHARS: usize = 500;

/// Characters removed from user input before anything else looks at it.
const STRIPPED_CHARS: &[char] = &[';', '\\', '\'', '"', '`'];

/// Words that must never reach the model, matched case-insensitively.
const DENIED_WORDS: &[&str] = &["exec", "execute", "sysobjects", "syscolumns"];

/// Procedure prefixes; any word starting with one is denied.
const DENIED_PREFIXES: &[&str] = &["sp_", "xp_"];

/// User prompt that survived [`sanitize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedPrompt(String);

impl SanitizedPrompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SanitizedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn sanitize(raw: &str) -> PipelineResult<SanitizedPrompt> {
    let stripped: String = raw.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
    let prompt = stripped.trim();

    if prompt.is_empty() {
        return Err(PipelineError::InvalidInput("prompt is empty".to_string()));
    }

    let length = prompt.chars().count();
    if length < MIN_PROMPT_CHARS {
        return Err(PipelineError::InvalidInput(format!(
            "prompt must be at least {} characters",
            MIN_PROMPT_CHARS
        )));
    }
    if length > MAX_PROMPT_CHARS {
        return Err(PipelineError::InvalidInput(format!(
            "prompt exceeds {} characters",
            MAX_PROMPT_CHARS
        )));
    }

    if let Some(word) = find_denied_word(prompt) {
        return Err(PipelineError::InvalidInput(format!(
            "prompt contains disallowed keyword '{}'",
            word
        )));
    }

    Ok(SanitizedPrompt(prompt.to_string()))
}

fn find_denied_word(text: &str) -> Option<&str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .find(|word| {
            let lower = word.to_ascii_lowercase();
            DENIED_WORDS.contains(&lower.as_str())
                || DENIED_PREFIXES.iter().any(|p| lower.starts_with(p))
        })
}
