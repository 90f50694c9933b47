use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One turn of a recovered conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub role: String,
    pub content: String,
}

impl ParsedMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        role_matches(&self.role, "user")
    }
}

pub fn role_matches(role: &str, expected: &str) -> bool {
    role.trim().eq_ignore_ascii_case(expected)
}

/// A stored conversation record as returned by the chat-history endpoint.
///
/// `prompt` stays untyped; the producer does not agree with itself on its shape.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    #[serde(default)]
    pub prompt: Value,

    #[serde(default, alias = "user_id", deserialize_with = "lenient_id")]
    pub user_id: Option<String>,

    #[serde(default, alias = "agent_id", deserialize_with = "lenient_id")]
    pub agent_id: Option<String>,

    #[serde(default, alias = "created_at", deserialize_with = "lenient_id")]
    pub created_at: Option<String>,

    #[serde(
        default,
        alias = "thread_id",
        alias = "sessionId",
        alias = "session_id",
        deserialize_with = "lenient_id"
    )]
    pub thread_id: Option<String>,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}
