use crate::domain::ParsedMessage;
use regex::Regex;
use serde_json::Value;

/// Which interpretation of the raw prompt produced the messages.
///
/// Variants are listed in the order they are attempted. The first one that yields
/// a result wins, so reordering them changes what ambiguous inputs parse to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseStrategy {
    /// The value already was an array of records.
    Array,
    /// A string holding a JSON array.
    Json,
    /// A JSON array wrapped in one extra pair of outer quotes.
    Unquoted,
    /// Python-repr style text with single quotes.
    SingleQuotes,
    /// Object keys without quotes (applied on top of the single-quote rewrite).
    BareKeys,
    /// `role=..., content=...` shorthand pulled out of `{...}` groups.
    Loose,
    /// A JSON array embedded in surrounding text.
    Bracketed,
    /// Nothing matched; the whole text is one user turn.
    Fallback,
}

impl ParseStrategy {
    pub fn label(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Json => "json",
            Self::Unquoted => "unquoted",
            Self::SingleQuotes => "single-quotes",
            Self::BareKeys => "bare-keys",
            Self::Loose => "loose",
            Self::Bracketed => "bracketed",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedPrompt {
    pub messages: Vec<ParsedMessage>,
    /// `None` when the input was empty and no strategy ran.
    pub strategy: Option<ParseStrategy>,
}

impl ParsedPrompt {
    fn empty() -> Self {
        Self {
            messages: Vec::new(),
            strategy: None,
        }
    }

    fn resolved(messages: Vec<ParsedMessage>, strategy: ParseStrategy) -> Self {
        Self {
            messages,
            strategy: Some(strategy),
        }
    }
}

/// Recovers an ordered conversation from a loosely structured prompt value.
///
/// Never fails: input that defeats every structured interpretation comes back as a
/// single user turn, and empty input comes back as an empty list.
pub fn parse_prompt(raw: &Value) -> Vec<ParsedMessage> {
    parse_prompt_detailed(raw).messages
}

pub fn parse_prompt_detailed(raw: &Value) -> ParsedPrompt {
    let parsed = interpret(raw);
    match parsed.strategy {
        Some(strategy) => tracing::debug!(
            strategy = strategy.label(),
            messages = parsed.messages.len(),
            "parsed prompt"
        ),
        None => tracing::trace!("empty prompt"),
    }
    parsed
}

fn interpret(raw: &Value) -> ParsedPrompt {
    let text = match raw {
        Value::Null => return ParsedPrompt::empty(),
        Value::Array(records) => {
            return ParsedPrompt::resolved(normalize_records(records), ParseStrategy::Array);
        }
        Value::String(text) => text.trim().to_string(),
        other => other.to_string().trim().to_string(),
    };
    if text.is_empty() {
        return ParsedPrompt::empty();
    }

    if let Some(records) = json_array(&text) {
        return ParsedPrompt::resolved(normalize_records(&records), ParseStrategy::Json);
    }

    if let Some(inner) = strip_outer_quotes(&text) {
        if let Some(records) = json_array(inner) {
            return ParsedPrompt::resolved(normalize_records(&records), ParseStrategy::Unquoted);
        }
    }

    // Lossy when content carries apostrophes; later steps still get the original text.
    let double_quoted = text.replace('\'', "\"");
    if let Some(records) = json_array(&double_quoted) {
        return ParsedPrompt::resolved(normalize_records(&records), ParseStrategy::SingleQuotes);
    }

    let keyed = quote_bare_keys(&double_quoted);
    if let Some(records) = json_array(&keyed) {
        return ParsedPrompt::resolved(normalize_records(&records), ParseStrategy::BareKeys);
    }

    let loose = extract_loose_messages(&text);
    if !loose.is_empty() {
        return ParsedPrompt::resolved(loose, ParseStrategy::Loose);
    }

    if let Some(span) = bracketed_span(&text) {
        if let Some(records) = json_array(span) {
            return ParsedPrompt::resolved(normalize_records(&records), ParseStrategy::Bracketed);
        }
    }

    ParsedPrompt::resolved(
        vec![ParsedMessage::new("user", text)],
        ParseStrategy::Fallback,
    )
}

pub fn first_user(messages: &[ParsedMessage]) -> Option<&ParsedMessage> {
    messages.iter().find(|message| message.is_user())
}

pub fn last_user(messages: &[ParsedMessage]) -> Option<&ParsedMessage> {
    messages.iter().rev().find(|message| message.is_user())
}

fn parity_role(index: usize) -> &'static str {
    if index % 2 == 0 { "user" } else { "assistant" }
}

fn json_array(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(records)) => Some(records),
        _ => None,
    }
}

fn strip_outer_quotes(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    if first != last || !(first == b'"' || first == b'\'') {
        return None;
    }
    Some(&text[1..text.len() - 1])
}

fn quote_bare_keys(text: &str) -> String {
    let Ok(pattern) = Regex::new(r#"([{,]\s*)([A-Za-z0-9_@$-]+)\s*:"#) else {
        return text.to_string();
    };
    pattern.replace_all(text, r#"${1}"${2}":"#).into_owned()
}

fn bracketed_span(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

fn normalize_records(records: &[Value]) -> Vec<ParsedMessage> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| normalize_record(index, record))
        .collect()
}

fn normalize_record(index: usize, record: &Value) -> ParsedMessage {
    let Value::Object(fields) = record else {
        return ParsedMessage::new(parity_role(index), content_text(record));
    };

    let role = fields
        .get("role")
        .and_then(scalar_text)
        .map(|role| role.trim().to_string())
        .filter(|role| !role.is_empty())
        .unwrap_or_else(|| parity_role(index).to_string());
    let content = fields
        .get("content")
        .filter(|value| !value.is_null())
        .or_else(|| fields.get("text").filter(|value| !value.is_null()))
        .map(content_text)
        .unwrap_or_default();

    ParsedMessage { role, content }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn content_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        // Multi-part content (`[{"type":"text","text":"..."}]`) reads as its text parts.
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                Value::Object(fields) => fields.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

struct LoosePatterns {
    chunk: Regex,
    role: Regex,
    content: Regex,
}

impl LoosePatterns {
    fn compile() -> Option<Self> {
        let chunk = Regex::new(r"\{[^{}]*\}").ok()?;
        let role = Regex::new(loose_field_pattern("role").as_str()).ok()?;
        let content = Regex::new(loose_field_pattern("content").as_str()).ok()?;
        Some(Self {
            chunk,
            role,
            content,
        })
    }
}

fn loose_field_pattern(key: &str) -> String {
    format!(
        r#"\b{key}["']?\s*[:=]\s*(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)'|([^,}}]*))"#
    )
}

fn extract_loose_messages(text: &str) -> Vec<ParsedMessage> {
    let Some(patterns) = LoosePatterns::compile() else {
        return Vec::new();
    };

    let mut chunks = patterns
        .chunk
        .find_iter(text)
        .map(|found| found.as_str())
        .collect::<Vec<_>>();
    if chunks.is_empty() {
        // `[role=user, content=hi]`: the list brackets would otherwise end up in bare tokens.
        let whole = text
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(text);
        chunks.push(whole);
    }

    let mut messages: Vec<ParsedMessage> = Vec::new();
    for chunk in chunks {
        let role = loose_field(&patterns.role, chunk);
        let content = loose_field(&patterns.content, chunk);
        if role.is_none() && content.is_none() {
            continue;
        }
        let role = role.unwrap_or_else(|| parity_role(messages.len()).to_string());
        messages.push(ParsedMessage {
            role,
            content: content.unwrap_or_default(),
        });
    }
    messages
}

fn loose_field(pattern: &Regex, chunk: &str) -> Option<String> {
    let captures = pattern.captures(chunk)?;
    if let Some(quoted) = captures.get(1).or_else(|| captures.get(2)) {
        return Some(unescape_loose(quoted.as_str()));
    }
    let bare = captures.get(3)?.as_str().trim();
    if bare.is_empty() {
        return None;
    }
    Some(bare.to_string())
}

fn unescape_loose(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn msg(role: &str, content: &str) -> ParsedMessage {
        ParsedMessage::new(role, content)
    }

    fn parse_text(text: &str) -> ParsedPrompt {
        parse_prompt_detailed(&Value::String(text.to_string()))
    }

    #[test]
    fn empty_inputs_produce_no_messages() {
        assert_eq!(parse_prompt(&Value::Null), Vec::new());
        assert_eq!(parse_prompt(&json!("")), Vec::new());
        assert_eq!(parse_prompt(&json!("   \n")), Vec::new());
        assert_eq!(parse_prompt(&json!([])), Vec::new());
    }

    #[test]
    fn well_formed_array_is_kept_in_order() {
        let raw = json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"}
        ]);
        let parsed = parse_prompt_detailed(&raw);
        assert_eq!(parsed.strategy, Some(ParseStrategy::Array));
        assert_eq!(
            parsed.messages,
            vec![msg("user", "hi"), msg("assistant", "hello")]
        );
    }

    #[test]
    fn missing_roles_alternate_from_user() {
        let raw = json!([{"content": "a"}, {"text": "b"}, {"content": "c"}, "d"]);
        let roles = parse_prompt(&raw)
            .into_iter()
            .map(|message| message.role)
            .collect::<Vec<_>>();
        assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);
    }

    #[test]
    fn single_unlabeled_element_is_user() {
        assert_eq!(parse_prompt(&json!([{"content": "x"}])), vec![msg("user", "x")]);
    }

    #[test]
    fn role_is_trimmed_but_keeps_casing() {
        let parsed = parse_prompt(&json!([{"role": " Assistant ", "content": "x"}]));
        assert_eq!(parsed, vec![msg("Assistant", "x")]);
    }

    #[test]
    fn content_falls_back_to_text_then_empty() {
        let parsed = parse_prompt(&json!([
            {"role": "user", "content": null, "text": "from text"},
            {"role": "assistant"}
        ]));
        assert_eq!(
            parsed,
            vec![msg("user", "from text"), msg("assistant", "")]
        );
    }

    #[test]
    fn multi_part_content_is_flattened() {
        let parsed = parse_prompt(&json!([
            {"role": "user", "content": [{"type": "text", "text": "one"}, "two", {"type": "image"}]}
        ]));
        assert_eq!(parsed, vec![msg("user", "one\ntwo")]);
    }

    #[test]
    fn json_string_is_unwrapped() {
        let parsed = parse_text(r#"[{"role":"user","content":"hi"}]"#);
        assert_eq!(parsed.strategy, Some(ParseStrategy::Json));
        assert_eq!(parsed.messages, vec![msg("user", "hi")]);
    }

    #[test]
    fn one_layer_of_outer_quotes_is_stripped() {
        let parsed = parse_text(r#"'[{"role":"user","content":"hi"}]'"#);
        assert_eq!(parsed.strategy, Some(ParseStrategy::Unquoted));
        assert_eq!(parsed.messages, vec![msg("user", "hi")]);
    }

    #[test]
    fn single_quoted_repr_is_rewritten() {
        let parsed = parse_text(
            "[{'role': 'user', 'content': 'hi'}, {'role': 'assistant', 'content': 'yo'}]",
        );
        assert_eq!(parsed.strategy, Some(ParseStrategy::SingleQuotes));
        assert_eq!(parsed.messages, vec![msg("user", "hi"), msg("assistant", "yo")]);
    }

    #[test]
    fn bare_keys_are_quoted() {
        let parsed =
            parse_text(r#"[{role: "user", content: "hi"}, {role:'assistant',content:'ok'}]"#);
        assert_eq!(parsed.strategy, Some(ParseStrategy::BareKeys));
        assert_eq!(parsed.messages, vec![msg("user", "hi"), msg("assistant", "ok")]);
    }

    #[test]
    fn shorthand_without_quotes_is_extracted_loosely() {
        let parsed = parse_text("[{role:user, content:hi}, {role:assistant, content:hello}]");
        assert_eq!(parsed.strategy, Some(ParseStrategy::Loose));
        assert_eq!(parsed.messages, vec![msg("user", "hi"), msg("assistant", "hello")]);
    }

    #[test]
    fn equals_shorthand_and_missing_roles() {
        let parsed = parse_text("[{role=user, content=ping}, {content=pong}, {junk}]");
        assert_eq!(parsed.strategy, Some(ParseStrategy::Loose));
        assert_eq!(parsed.messages, vec![msg("user", "ping"), msg("assistant", "pong")]);
    }

    #[test]
    fn shorthand_without_braces_is_one_chunk() {
        let parsed = parse_text("role=user, content=hello there");
        assert_eq!(parsed.strategy, Some(ParseStrategy::Loose));
        assert_eq!(parsed.messages, vec![msg("user", "hello there")]);
    }

    #[test]
    fn bracketed_shorthand_without_braces_drops_list_brackets() {
        let parsed = parse_text("[role=user, content=hi]");
        assert_eq!(parsed.strategy, Some(ParseStrategy::Loose));
        assert_eq!(parsed.messages, vec![msg("user", "hi")]);

        let parsed = parse_text("[content=only text]");
        assert_eq!(parsed.messages, vec![msg("user", "only text")]);
    }

    #[test]
    fn apostrophes_survive_through_loose_extraction() {
        let parsed = parse_text(r#"[{'role': 'user', 'content': "it's fine"}]"#);
        assert_eq!(parsed.strategy, Some(ParseStrategy::Loose));
        assert_eq!(parsed.messages, vec![msg("user", "it's fine")]);
    }

    #[test]
    fn embedded_array_is_found_between_brackets() {
        let parsed = parse_text(r#"history follows: ["hello", "world"] (end)"#);
        assert_eq!(parsed.strategy, Some(ParseStrategy::Bracketed));
        assert_eq!(parsed.messages, vec![msg("user", "hello"), msg("assistant", "world")]);
    }

    #[test]
    fn embedded_array_of_text_records() {
        let parsed = parse_text(r#"log: [{"text":"hi"}] done"#);
        assert_eq!(parsed.strategy, Some(ParseStrategy::Bracketed));
        assert_eq!(parsed.messages, vec![msg("user", "hi")]);
    }

    #[test]
    fn free_text_becomes_single_user_turn() {
        let parsed = parse_text("  just some free text ");
        assert_eq!(parsed.strategy, Some(ParseStrategy::Fallback));
        assert_eq!(parsed.messages, vec![msg("user", "just some free text")]);
    }

    #[test]
    fn non_string_scalars_are_stringified() {
        assert_eq!(parse_prompt(&json!(42)), vec![msg("user", "42")]);
        let parsed = parse_prompt(&json!({"role": "assistant", "content": "x"}));
        assert_eq!(parsed, vec![msg("assistant", "x")]);
    }

    #[test]
    fn reparsing_serialized_output_is_stable() {
        let original = parse_text(
            "[{'role': 'user', 'content': 'hi'}, {'role': 'assistant', 'content': 'yo'}]",
        )
        .messages;
        let serialized = serde_json::to_string(&original).expect("serialize");
        assert_eq!(parse_prompt(&Value::String(serialized)), original);
    }

    #[test]
    fn first_and_last_user_lookups() {
        assert_eq!(first_user(&[]), None);
        assert_eq!(last_user(&[]), None);

        let only_assistant = vec![msg("assistant", "a")];
        assert_eq!(first_user(&only_assistant), None);
        assert_eq!(last_user(&only_assistant), None);

        let turns = vec![
            msg("USER", "first"),
            msg("assistant", "reply"),
            msg("user", "second"),
            msg("assistant", "reply 2"),
        ];
        assert_eq!(first_user(&turns).map(|m| m.content.as_str()), Some("first"));
        assert_eq!(last_user(&turns).map(|m| m.content.as_str()), Some("second"));
    }
}
