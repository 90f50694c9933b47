use crate::domain::{
    HistoryItem, ParsedMessage, format_created_at, format_transcript, parse_prompt,
    parse_prompt_detailed, plan_continue, plan_new_thread, preview_text,
};
use crate::infra::{
    Config, CopyTranscriptError, LoadHistoryError, SaveConfigError, clipboard_waits_for_paste,
    config_path, copy_transcript_to_clipboard, load_history, read_input, save_config,
};
use serde_json::Value;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_LIMIT: usize = 20;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command(CliCommand),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Parse {
        input: Option<PathBuf>,
        json: bool,
        explain: bool,
    },
    List {
        history: PathBuf,
        offset: usize,
        limit: usize,
        width: Option<usize>,
    },
    Show {
        history: PathBuf,
        index: usize,
        json: bool,
    },
    Resume {
        history: PathBuf,
        index: usize,
        new_thread: bool,
    },
    Copy {
        history: PathBuf,
        index: usize,
    },
    Config {
        preview_chars: Option<usize>,
        log_filter: Option<String>,
    },
}

impl CliCommand {
    /// `config` is how a broken config file gets rewritten, so it must not require a
    /// readable one.
    pub fn rewrites_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut iter = args.iter().skip(1);
    let Some(subcommand) = iter.next() else {
        return Ok(CliInvocation::PrintHelp);
    };

    match subcommand.as_str() {
        "parse" => {
            let mut input: Option<PathBuf> = None;
            let mut json = false;
            let mut explain = false;

            for arg in iter {
                match arg.as_str() {
                    "--json" => {
                        json = true;
                    }
                    "--explain" => {
                        explain = true;
                    }
                    "-" => {
                        set_positional(&mut input, arg)?;
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => {
                        set_positional(&mut input, arg)?;
                    }
                }
            }

            Ok(CliInvocation::Command(CliCommand::Parse {
                input,
                json,
                explain,
            }))
        }
        "list" => {
            let mut history: Option<PathBuf> = None;
            let mut offset = 0usize;
            let mut limit = DEFAULT_LIMIT;
            let mut width: Option<usize> = None;

            let mut args = iter.peekable();
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--limit" | "-l" => {
                        let value = args.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--limit".to_string())
                        })?;
                        limit = parse_usize_flag("--limit", value)?;
                    }
                    "--offset" | "-o" => {
                        let value = args.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--offset".to_string())
                        })?;
                        offset = parse_usize_flag("--offset", value)?;
                    }
                    "--width" | "-w" => {
                        let value = args.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--width".to_string())
                        })?;
                        width = Some(parse_usize_flag("--width", value)?);
                    }
                    "-" => {
                        set_positional(&mut history, arg)?;
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => {
                        set_positional(&mut history, arg)?;
                    }
                }
            }

            let history = history.ok_or(CliParseError::MissingArgument("history file"))?;
            Ok(CliInvocation::Command(CliCommand::List {
                history,
                offset,
                limit,
                width,
            }))
        }
        "show" | "resume" | "copy" => {
            let mut history: Option<PathBuf> = None;
            let mut index: Option<usize> = None;
            let mut json = false;
            let mut new_thread = false;

            for arg in iter {
                match arg.as_str() {
                    "--json" if subcommand == "show" => {
                        json = true;
                    }
                    "--new-thread" if subcommand == "resume" => {
                        new_thread = true;
                    }
                    "-" => {
                        set_positional(&mut history, arg)?;
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => {
                        if history.is_none() {
                            history = Some(PathBuf::from(arg));
                            continue;
                        }
                        if index.is_some() {
                            return Err(CliParseError::UnexpectedArgument(arg.to_string()));
                        }
                        index = Some(parse_usize_flag("INDEX", arg)?);
                    }
                }
            }

            let history = history.ok_or(CliParseError::MissingArgument("history file"))?;
            let index = index.ok_or(CliParseError::MissingArgument("record index"))?;
            let command = match subcommand.as_str() {
                "show" => CliCommand::Show {
                    history,
                    index,
                    json,
                },
                "resume" => CliCommand::Resume {
                    history,
                    index,
                    new_thread,
                },
                _ => CliCommand::Copy { history, index },
            };
            Ok(CliInvocation::Command(command))
        }
        "config" => {
            let mut preview_chars: Option<usize> = None;
            let mut log_filter: Option<String> = None;

            let mut args = iter.peekable();
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--preview-chars" => {
                        let value = args.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--preview-chars".to_string())
                        })?;
                        let chars = parse_usize_flag("--preview-chars", value)?;
                        if chars == 0 {
                            return Err(CliParseError::InvalidFlagValue {
                                flag: "--preview-chars".to_string(),
                                value: value.to_string(),
                            });
                        }
                        preview_chars = Some(chars);
                    }
                    "--log-filter" => {
                        let value = args.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--log-filter".to_string())
                        })?;
                        log_filter = Some(value.trim().to_string());
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => {
                        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
                    }
                }
            }

            Ok(CliInvocation::Command(CliCommand::Config {
                preview_chars,
                log_filter,
            }))
        }
        other => Err(CliParseError::UnknownSubcommand(other.to_string())),
    }
}

fn set_positional(slot: &mut Option<PathBuf>, arg: &str) -> Result<(), CliParseError> {
    if slot.is_some() {
        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
    }
    *slot = Some(PathBuf::from(arg));
    Ok(())
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error(transparent)]
    LoadHistory(#[from] LoadHistoryError),

    #[error(transparent)]
    Copy(#[from] CopyTranscriptError),

    #[error(transparent)]
    SaveConfig(#[from] SaveConfigError),

    #[error("failed to read prompt {path}: {source}")]
    ReadPrompt { path: String, source: io::Error },

    #[error(
        "no history record at index {index} ({total} loaded)\nHint: run `promptlog list <file>` and copy the index column."
    )]
    RecordNotFound { index: usize, total: usize },

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    WriteOutput(#[from] io::Error),
}

pub fn run(command: CliCommand, state_dir: &Path, config: &Config) -> Result<(), CliRunError> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let stderr = io::stderr();
    let mut err = io::BufWriter::new(stderr.lock());

    match command {
        CliCommand::Parse {
            input,
            json,
            explain,
        } => {
            let input = input.unwrap_or_else(|| PathBuf::from("-"));
            let text = read_input(&input).map_err(|source| CliRunError::ReadPrompt {
                path: input.display().to_string(),
                source,
            })?;
            let raw = raw_prompt_from_text(&text);
            let parsed = parse_prompt_detailed(&raw);

            if json {
                let rendered = serde_json::to_string_pretty(&parsed.messages)?;
                write_line(&mut out, &rendered)?;
            } else {
                for message in &parsed.messages {
                    if !write_line(&mut out, &format_message_line(message))? {
                        return Ok(());
                    }
                }
            }
            if explain {
                let label = parsed.strategy.map_or("empty", |strategy| strategy.label());
                write_line(&mut err, &format!("strategy:\t{label}"))?;
            }
            Ok(())
        }
        CliCommand::List {
            history,
            offset,
            limit,
            width,
        } => {
            let load = load_history(&history)?;
            let width = width.unwrap_or(config.preview_chars);
            for (index, item) in load.items.iter().enumerate().skip(offset).take(limit) {
                let parsed = parse_prompt(&item.prompt);
                let line = format!(
                    "{index}\t{}\t{}\t{}\t{}",
                    item.created_at
                        .as_deref()
                        .map(format_created_at)
                        .unwrap_or_default(),
                    item.thread_id.as_deref().unwrap_or(""),
                    parsed.len(),
                    preview_text(&item.prompt, &parsed, width),
                );
                if !write_line(&mut out, &line)? {
                    return Ok(());
                }
            }
            write_warnings(&mut err, load.warnings)?;
            Ok(())
        }
        CliCommand::Show {
            history,
            index,
            json,
        } => {
            let load = load_history(&history)?;
            let item = select_record(&load.items, index)?;
            let parsed = parse_prompt(&item.prompt);
            let rendered = if json {
                serde_json::to_string_pretty(&parsed)?
            } else {
                format_transcript(&parsed)
            };
            write_line(&mut out, &rendered)?;
            write_warnings(&mut err, load.warnings)?;
            Ok(())
        }
        CliCommand::Resume {
            history,
            index,
            new_thread,
        } => {
            let load = load_history(&history)?;
            let item = select_record(&load.items, index)?;
            let parsed = parse_prompt(&item.prompt);
            let plan = if new_thread {
                plan_new_thread(item, &parsed, Uuid::now_v7().to_string())
            } else {
                plan_continue(item, &parsed)
            };
            tracing::debug!(
                thread_id = plan.thread_id.as_deref().unwrap_or(""),
                history = plan.history.len(),
                auto_send = plan.auto_send.is_some(),
                "planned thread resume"
            );
            write_line(&mut out, &serde_json::to_string_pretty(&plan)?)?;
            Ok(())
        }
        CliCommand::Copy { history, index } => {
            let load = load_history(&history)?;
            let item = select_record(&load.items, index)?;
            let parsed = parse_prompt(&item.prompt);
            if clipboard_waits_for_paste() {
                write_line(&mut err, "copy: holding clipboard until another app takes it")?;
                err.flush()?;
            }
            copy_transcript_to_clipboard(&format_transcript(&parsed))?;
            write_line(&mut out, &format!("copied:\t{} messages", parsed.len()))?;
            Ok(())
        }
        CliCommand::Config {
            preview_chars,
            log_filter,
        } => {
            let mut config = config.clone();
            let changed = preview_chars.is_some() || log_filter.is_some();
            if let Some(chars) = preview_chars {
                config.preview_chars = chars;
            }
            if let Some(filter) = log_filter {
                config.log_filter = (!filter.is_empty()).then_some(filter);
            }
            if changed {
                save_config(state_dir, &config)?;
            }

            write_line(
                &mut out,
                &format!("config_path\t{}", config_path(state_dir).display()),
            )?;
            write_line(&mut out, &format!("preview_chars\t{}", config.preview_chars))?;
            write_line(
                &mut out,
                &format!("log_filter\t{}", config.log_filter.as_deref().unwrap_or("")),
            )?;
            Ok(())
        }
    }
}

/// Interprets CLI input the way the history endpoint would hand it over: JSON arrays,
/// JSON strings and `null` are taken as values, anything else as raw prompt text.
fn raw_prompt_from_text(text: &str) -> Value {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ (Value::Array(_) | Value::String(_) | Value::Null)) => value,
        _ => Value::String(text.to_string()),
    }
}

fn select_record(items: &[HistoryItem], index: usize) -> Result<&HistoryItem, CliRunError> {
    items.get(index).ok_or(CliRunError::RecordNotFound {
        index,
        total: items.len(),
    })
}

fn format_message_line(message: &ParsedMessage) -> String {
    let content = message.content.replace('\r', "").replace('\n', "\\n");
    format!("{}\t{content}", message.role)
}

fn write_warnings(err: &mut impl Write, warnings: usize) -> io::Result<()> {
    if warnings > 0 {
        write_line(err, &format!("warnings: {warnings}"))?;
    }
    Ok(())
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(error) => Err(error),
    }
}

fn parse_usize_flag(flag: &str, value: &str) -> Result<usize, CliParseError> {
    value
        .parse::<usize>()
        .map_err(|_| CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn parse_defaults_to_help_when_no_args() {
        let parsed = parse_invocation(&args(&["promptlog"])).expect("parse");
        assert_eq!(parsed, CliInvocation::PrintHelp);
    }

    #[test]
    fn parse_help_and_version_flags_win() {
        let parsed = parse_invocation(&args(&["promptlog", "list", "--help"])).expect("parse");
        assert_eq!(parsed, CliInvocation::PrintHelp);
        let parsed = parse_invocation(&args(&["promptlog", "-V"])).expect("parse");
        assert_eq!(parsed, CliInvocation::PrintVersion);
    }

    #[test]
    fn parse_command_reads_stdin_by_default() {
        let parsed =
            parse_invocation(&args(&["promptlog", "parse", "--explain"])).expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Parse {
                input: None,
                json: false,
                explain: true,
            })
        );

        let parsed =
            parse_invocation(&args(&["promptlog", "parse", "-", "--json"])).expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Parse {
                input: Some(PathBuf::from("-")),
                json: true,
                explain: false,
            })
        );
    }

    #[test]
    fn parse_list_command_with_paging() {
        let parsed = parse_invocation(&args(&[
            "promptlog",
            "list",
            "history.json",
            "--limit",
            "5",
            "-o",
            "2",
            "--width",
            "40",
        ]))
        .expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::List {
                history: PathBuf::from("history.json"),
                offset: 2,
                limit: 5,
                width: Some(40),
            })
        );
    }

    #[test]
    fn parse_list_requires_history_file() {
        let err = parse_invocation(&args(&["promptlog", "list"])).expect_err("missing file");
        assert!(matches!(err, CliParseError::MissingArgument("history file")));
    }

    #[test]
    fn parse_record_commands() {
        let parsed =
            parse_invocation(&args(&["promptlog", "show", "h.json", "3", "--json"])).expect("show");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Show {
                history: PathBuf::from("h.json"),
                index: 3,
                json: true,
            })
        );

        let parsed = parse_invocation(&args(&[
            "promptlog",
            "resume",
            "h.json",
            "0",
            "--new-thread",
        ]))
        .expect("resume");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Resume {
                history: PathBuf::from("h.json"),
                index: 0,
                new_thread: true,
            })
        );

        let parsed = parse_invocation(&args(&["promptlog", "copy", "-", "1"])).expect("copy");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Copy {
                history: PathBuf::from("-"),
                index: 1,
            })
        );
    }

    #[test]
    fn parse_rejects_flags_from_other_commands() {
        let err = parse_invocation(&args(&["promptlog", "copy", "h.json", "1", "--json"]))
            .expect_err("flag");
        assert!(matches!(err, CliParseError::UnknownFlag(flag) if flag == "--json"));
    }

    #[test]
    fn parse_rejects_bad_index_and_missing_values() {
        let err =
            parse_invocation(&args(&["promptlog", "show", "h.json", "x"])).expect_err("index");
        assert!(matches!(err, CliParseError::InvalidFlagValue { .. }));

        let err = parse_invocation(&args(&["promptlog", "show", "h.json"])).expect_err("missing");
        assert!(matches!(err, CliParseError::MissingArgument("record index")));

        let err = parse_invocation(&args(&["promptlog", "list", "h.json", "--limit"]))
            .expect_err("value");
        assert!(matches!(err, CliParseError::MissingFlagValue(_)));
    }

    #[test]
    fn parse_config_command() {
        let parsed = parse_invocation(&args(&[
            "promptlog",
            "config",
            "--preview-chars",
            "60",
            "--log-filter",
            "debug",
        ]))
        .expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Config {
                preview_chars: Some(60),
                log_filter: Some("debug".to_string()),
            })
        );

        let err = parse_invocation(&args(&["promptlog", "config", "--preview-chars", "0"]))
            .expect_err("zero");
        assert!(matches!(err, CliParseError::InvalidFlagValue { .. }));
    }

    #[test]
    fn only_config_command_rewrites_config() {
        let config = CliCommand::Config {
            preview_chars: Some(10),
            log_filter: None,
        };
        assert!(config.rewrites_config());

        let list = CliCommand::List {
            history: PathBuf::from("h.json"),
            offset: 0,
            limit: DEFAULT_LIMIT,
            width: None,
        };
        assert!(!list.rewrites_config());
    }

    #[test]
    fn parse_unknown_subcommand() {
        let err = parse_invocation(&args(&["promptlog", "nope"])).expect_err("unknown");
        assert!(matches!(err, CliParseError::UnknownSubcommand(name) if name == "nope"));
    }

    #[test]
    fn raw_prompt_input_keeps_json_values_and_plain_text() {
        assert_eq!(raw_prompt_from_text("[1]\n"), json!([1]));
        assert_eq!(raw_prompt_from_text("\"[x]\""), json!("[x]"));
        assert_eq!(raw_prompt_from_text("null"), Value::Null);
        assert_eq!(
            raw_prompt_from_text("{role:user}"),
            Value::String("{role:user}".to_string())
        );
        assert_eq!(raw_prompt_from_text("42"), Value::String("42".to_string()));
    }

    #[test]
    fn message_lines_escape_newlines() {
        let line = format_message_line(&ParsedMessage::new("user", "a\r\nb"));
        assert_eq!(line, "user\ta\\nb");
    }

    #[test]
    fn select_record_reports_bounds() {
        let items = vec![HistoryItem::default()];
        assert!(select_record(&items, 0).is_ok());
        let err = select_record(&items, 4).expect_err("bounds");
        assert!(matches!(
            err,
            CliRunError::RecordNotFound { index: 4, total: 1 }
        ));
    }
}
