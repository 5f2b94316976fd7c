//! Hazard verdict model and the heuristic that digs it out of free-form model replies.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model's answer to "does this image depict a potential hazard?".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardAnswer {
    Yes,
    No,
    #[default]
    Unknown,
}

impl HazardAnswer {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" => HazardAnswer::Yes,
                "no" | "false" => HazardAnswer::No,
                _ => HazardAnswer::Unknown,
            },
            Some(Value::Bool(true)) => HazardAnswer::Yes,
            Some(Value::Bool(false)) => HazardAnswer::No,
            _ => HazardAnswer::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HazardAnswer::Yes => "yes",
            HazardAnswer::No => "no",
            HazardAnswer::Unknown => "unknown",
        }
    }
}

/// Classification result persisted next to the captured image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HazardVerdict {
    pub answer: HazardAnswer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HazardVerdict {
    /// Interpret a parsed JSON object. Missing or unexpected fields degrade to
    /// `unknown` / no reason instead of failing.
    pub fn from_json(value: &Value) -> Self {
        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);

        Self {
            answer: HazardAnswer::from_value(value.get("answer")),
            reason,
        }
    }

    /// Extract and interpret the verdict embedded in a model reply.
    pub fn from_reply(text: &str) -> Option<Self> {
        extract_json_object(text).map(|value| Self::from_json(&value))
    }

    pub fn is_hazard(&self) -> bool {
        self.answer == HazardAnswer::Yes
    }
}

impl fmt::Display for HazardVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let answer = match self.answer {
            HazardAnswer::Unknown => "Unknown",
            other => other.as_str(),
        };
        let reason = self.reason.as_deref().unwrap_or("No reason provided");
        write!(f, "{answer}: {reason}")
    }
}

fn object_span() -> &'static Regex {
    static SPAN: OnceLock<Regex> = OnceLock::new();
    SPAN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static pattern is valid"))
}

/// Pull the JSON object out of text that may wrap it in prose.
///
/// This is a lossy heuristic rather than a parser: it takes the span from the
/// first `{` to the last `}` (greedy, across newlines) and accepts it only if
/// the whole span parses as a JSON object. Replies carrying two separate
/// objects, or braces in the surrounding prose, therefore yield `None`.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let span = object_span().find(text)?;
    match serde_json::from_str::<Value>(span.as_str()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_object_surrounded_by_prose() {
        let value =
            extract_json_object(r#"Sure! {"answer":"yes","reason":"wire down"} thanks"#).unwrap();
        assert_eq!(value, json!({"answer": "yes", "reason": "wire down"}));
    }

    #[test]
    fn extracts_fenced_multiline_object() {
        let reply = "```json\n{\n  \"answer\": \"no\",\n  \"reason\": \"empty hallway\"\n}\n```";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["answer"], "no");
        assert_eq!(value["reason"], "empty hallway");
    }

    #[test]
    fn nested_braces_stay_inside_span() {
        let value =
            extract_json_object(r#"{"answer":"yes","reason":"x","extra":{"k":1}} done"#).unwrap();
        assert_eq!(value["extra"]["k"], 1);
    }

    #[test]
    fn text_without_braces_yields_none() {
        assert_eq!(extract_json_object("I cannot help with that."), None);
        assert_eq!(extract_json_object(""), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn malformed_json_yields_none() {
        assert_eq!(extract_json_object(r#"{"answer":"yes","reason":"x",}"#), None);
        assert_eq!(extract_json_object("{answer: yes}"), None);
    }

    #[test]
    fn two_objects_are_not_merged() {
        assert_eq!(extract_json_object(r#"{"answer":"yes"} or {"answer":"no"}"#), None);
    }

    #[test]
    fn verdict_normalises_answer_and_reason() {
        let verdict = HazardVerdict::from_json(&json!({"answer": " YES ", "reason": " loose cable "}));
        assert_eq!(verdict.answer, HazardAnswer::Yes);
        assert_eq!(verdict.reason.as_deref(), Some("loose cable"));
        assert!(verdict.is_hazard());

        let verdict = HazardVerdict::from_json(&json!({"answer": "maybe"}));
        assert_eq!(verdict.answer, HazardAnswer::Unknown);
        assert_eq!(verdict.reason, None);
        assert_eq!(verdict.to_string(), "Unknown: No reason provided");
    }

    #[test]
    fn verdict_from_reply_reads_embedded_object() {
        let verdict =
            HazardVerdict::from_reply("Here you go:\n{\"answer\": \"no\", \"reason\": \"empty hallway\"}")
                .unwrap();
        assert_eq!(verdict.answer, HazardAnswer::No);
        assert_eq!(verdict.reason.as_deref(), Some("empty hallway"));
        assert_eq!(HazardVerdict::from_reply("no json here"), None);
    }

    #[test]
    fn verdict_serialises_with_lowercase_answer() {
        let verdict = HazardVerdict {
            answer: HazardAnswer::No,
            reason: Some("clear path".into()),
        };
        assert_eq!(
            serde_json::to_value(&verdict).unwrap(),
            json!({"answer": "no", "reason": "clear path"})
        );
    }
}
