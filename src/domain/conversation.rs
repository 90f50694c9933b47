use crate::domain::{HistoryItem, ParsedMessage, first_user, last_user};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use unicode_width::UnicodeWidthStr;

pub const DEFAULT_PREVIEW_CHARS: usize = 80;

/// What a resumed conversation hands to the chat-send side.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResume {
    pub thread_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    /// Turns sent as prior context.
    pub history: Vec<ParsedMessage>,
    /// User turn to dispatch right away, if any.
    pub auto_send: Option<ParsedMessage>,
}

/// Picks a one-line label for a history record.
///
/// Prefers the first user turn, then the last turn of any role, then the raw prompt.
pub fn preview_text(raw: &Value, parsed: &[ParsedMessage], max_chars: usize) -> String {
    let raw_text = match raw {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };

    let candidates = [
        first_user(parsed).map(|message| message.content.as_str()),
        parsed.last().map(|message| message.content.as_str()),
        Some(raw_text.as_str()),
    ];
    let line = candidates
        .into_iter()
        .flatten()
        .find_map(first_non_empty_line)
        .unwrap_or("");
    truncate_with_ellipsis(line, max_chars)
}

fn first_non_empty_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}

fn truncate_with_ellipsis(text: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }

    let budget = width.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width > budget {
            break;
        }
        used += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}

/// Renders turns the way they are shared or copied: `role: content` blocks.
pub fn format_transcript(parsed: &[ParsedMessage]) -> String {
    parsed
        .iter()
        .map(|message| format!("{}: {}", message.role, message.content.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Resumes the record's own thread. A trailing user turn that never got a reply is
/// dispatched again instead of being replayed as history.
pub fn plan_continue(item: &HistoryItem, parsed: &[ParsedMessage]) -> ThreadResume {
    let (history, auto_send) = match parsed.split_last() {
        Some((last, rest)) if last.is_user() => (rest.to_vec(), Some(last.clone())),
        _ => (parsed.to_vec(), None),
    };

    ThreadResume {
        thread_id: item.thread_id.clone(),
        user_id: item.user_id.clone(),
        agent_id: item.agent_id.clone(),
        history,
        auto_send,
    }
}

/// Starts a fresh thread seeded with the old conversation. The last user turn is sent
/// again so the new thread gets its own reply; everything before it is carried over.
pub fn plan_new_thread(
    item: &HistoryItem,
    parsed: &[ParsedMessage],
    new_thread_id: String,
) -> ThreadResume {
    let auto_send = last_user(parsed).cloned();
    let carried = parsed
        .iter()
        .rposition(ParsedMessage::is_user)
        .unwrap_or(parsed.len());
    let history = parsed[..carried].to_vec();

    ThreadResume {
        thread_id: Some(new_thread_id),
        user_id: item.user_id.clone(),
        agent_id: item.agent_id.clone(),
        history,
        auto_send,
    }
}

/// Epoch values at or above this are read as milliseconds (the cut-off is in 1973).
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Renders RFC 3339 text or numeric epoch seconds/milliseconds as `YYYY-MM-DD HH:MM` UTC.
/// Anything else is returned unchanged.
pub fn format_created_at(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(parsed) = parse_created_at(trimmed) else {
        return trimmed.to_string();
    };
    let utc = parsed.to_offset(time::UtcOffset::UTC);
    utc.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| trimmed.to_string())
}

fn parse_created_at(text: &str) -> Option<OffsetDateTime> {
    if let Ok(epoch) = text.parse::<i64>() {
        if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
            let nanos = i128::from(epoch).checked_mul(1_000_000)?;
            return OffsetDateTime::from_unix_timestamp_nanos(nanos).ok();
        }
        return OffsetDateTime::from_unix_timestamp(epoch).ok();
    }
    OffsetDateTime::parse(text, &Rfc3339).ok()
}
