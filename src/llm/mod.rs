pub mod tensorzero;

pub use tensorzero::{LlmClient, LlmConfig, LlmError, LlmMessage};

use serde::de::DeserializeOwned;

/// Strips an optional markdown code fence around a JSON reply.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|err| LlmError::InvalidResponse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        ok: bool,
    }

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_code_fence("```json\n{\"ok\":true}\n```"), "{\"ok\":true}");
        assert_eq!(strip_code_fence("```\n{\"ok\":true}```"), "{\"ok\":true}");
        assert_eq!(strip_code_fence("  {\"ok\":true} "), "{\"ok\":true}");
    }

    #[test]
    fn parse_reports_invalid_json() {
        let parsed: Reply = parse_json_reply("```json\n{\"ok\": true}\n```").expect("json");
        assert_eq!(parsed, Reply { ok: true });
        let err = parse_json_reply::<Reply>("not json").unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
