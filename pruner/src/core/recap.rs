//! Compact "previously on this session" recap of the user/assistant arc.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::protection::is_snapshot_message;
use crate::session::{Message, MessageKind};

pub const DEFAULT_MAX_TURNS: usize = 40;
/// Exchanges always shown from the start of a long session.
const HEAD_TURNS: usize = 4;
const USER_CHARS: usize = 70;
const ASSISTANT_CHARS: usize = 50;
const SENTENCE_CHARS: usize = 100;
/// Shorter turns are noise ("ok", "y").
const MIN_TURN_CHARS: usize = 3;

static NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?s)<(system-reminder|local-command-caveat|command-name|command-message|command-args|local-command-stdout)>.*?</(system-reminder|local-command-caveat|command-name|command-message|command-args|local-command-stdout)>",
        r"(?s)<[^>]+>.*?</[^>]+>",
        r"<[^>]+/?>",
        r"SessionStart:.*",
        r"\[Request interrupted by user[^\]]*\]",
        r"[▖▗▘▝▚▞]+",
        r"Claude Code v[\d.]+",
        r"#{1,6}\s+",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("recap noise pattern should compile"))
    .collect()
});

static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{1,2}([^*]+)\*{1,2}").expect("emphasis pattern should compile"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern should compile"));
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s").expect("sentence pattern should compile"));

/// One user turn and the assistant's reply; either side may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Speaker {
    User,
    Assistant,
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn clean_user_text(text: &str) -> String {
    let mut text = text.to_string();
    for pattern in NOISE.iter() {
        text = pattern.replace_all(&text, "").into_owned();
    }
    let text = EMPHASIS.replace_all(&text, "$1");
    collapse_whitespace(&text)
}

fn char_prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Cut to `max` characters, ending in `...` when shortened.
fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    format!("{}...", char_prefix(text, max.saturating_sub(3)))
}

fn first_sentence(text: &str) -> String {
    let window = char_prefix(text, SENTENCE_CHARS + 50);
    if let Some(found) = SENTENCE_END.find(window)
        && text[..found.end()].chars().count() <= SENTENCE_CHARS + 10
    {
        return text[..found.start() + 1].to_string();
    }
    ellipsize(text, SENTENCE_CHARS)
}

fn turns(messages: &[Message]) -> Vec<(Speaker, String)> {
    messages
        .iter()
        .filter(|message| !is_snapshot_message(message))
        .filter_map(|message| {
            let joined = message.texts().join(" ");
            let (speaker, text) = match message.kind() {
                MessageKind::User => (Speaker::User, clean_user_text(&joined)),
                MessageKind::Assistant => {
                    (Speaker::Assistant, first_sentence(&collapse_whitespace(&joined)))
                }
                _ => return None,
            };
            (text.chars().count() >= MIN_TURN_CHARS).then_some((speaker, text))
        })
        .collect()
}

/// Pair user turns with the following assistant turn.
///
/// Consecutive user turns are merged; of consecutive assistant turns only the
/// first is kept.
pub fn collect_exchanges(messages: &[Message]) -> Vec<Exchange> {
    let mut merged: Vec<(Speaker, String)> = Vec::new();
    for (speaker, text) in turns(messages) {
        if let Some((last, joined)) = merged.last_mut()
            && *last == speaker
        {
            if speaker == Speaker::User {
                joined.push(' ');
                joined.push_str(&text);
            }
            continue;
        }
        merged.push((speaker, text));
    }

    let mut exchanges = Vec::new();
    let mut iter = merged.into_iter().peekable();
    while let Some((speaker, text)) = iter.next() {
        match speaker {
            Speaker::User => {
                let assistant = match iter.peek() {
                    Some((Speaker::Assistant, _)) => iter.next().map(|(_, t)| t).unwrap_or_default(),
                    _ => String::new(),
                };
                exchanges.push(Exchange {
                    user: text,
                    assistant,
                });
            }
            Speaker::Assistant => exchanges.push(Exchange {
                user: String::new(),
                assistant: text,
            }),
        }
    }
    exchanges
}

fn format_exchange(out: &mut String, number: usize, exchange: &Exchange) {
    if exchange.user.is_empty() {
        let _ = writeln!(out, "  {number:>3}.  {}", ellipsize(&exchange.assistant, USER_CHARS));
        return;
    }
    let _ = writeln!(out, "  {number:>3}.  {}", ellipsize(&exchange.user, USER_CHARS));
    if !exchange.assistant.is_empty() {
        let _ = writeln!(out, "        {}", ellipsize(&exchange.assistant, ASSISTANT_CHARS));
    }
}

/// Render the recap, or an empty string when the session has no turns.
///
/// Sessions with more than `max_turns` exchanges show the first few and the
/// most recent ones around a skipped-count marker.
pub fn render_recap(messages: &[Message], max_turns: usize) -> String {
    let exchanges = collect_exchanges(messages);
    if exchanges.is_empty() {
        return String::new();
    }

    let mut out = String::from("Previously on this session\n\n");
    if exchanges.len() <= max_turns {
        for (idx, exchange) in exchanges.iter().enumerate() {
            format_exchange(&mut out, idx + 1, exchange);
        }
    } else {
        let tail = max_turns.saturating_sub(HEAD_TURNS + 1).max(1);
        let skipped = exchanges.len() - HEAD_TURNS - tail;
        for (idx, exchange) in exchanges.iter().take(HEAD_TURNS).enumerate() {
            format_exchange(&mut out, idx + 1, exchange);
        }
        let _ = writeln!(out, "\n        ... {skipped} exchanges skipped ...\n");
        let start = exchanges.len() - tail;
        for (idx, exchange) in exchanges.iter().enumerate().skip(start) {
            format_exchange(&mut out, idx + 1, exchange);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SessionBuilder;

    #[test]
    fn strips_system_tags_and_ui_noise() {
        let cleaned = clean_user_text(
            "<system-reminder>be nice</system-reminder>  Fix the **parser**\n\n## now <br/>",
        );
        assert_eq!(cleaned, "Fix the parser now");
    }

    #[test]
    fn assistant_turns_keep_first_sentence() {
        assert_eq!(
            first_sentence("Done. I also refactored the module."),
            "Done."
        );
        let long = "x".repeat(300);
        assert_eq!(first_sentence(&long).chars().count(), SENTENCE_CHARS);
    }

    #[test]
    fn merges_and_pairs_turns() {
        let messages = SessionBuilder::new()
            .assistant("Welcome back to the project.")
            .user("add tests")
            .user("for the lexer")
            .assistant("Added lexer tests. They pass.")
            .assistant("Anything else?")
            .user("no")
            .build();
        let exchanges = collect_exchanges(&messages);
        assert_eq!(
            exchanges,
            vec![
                Exchange {
                    user: String::new(),
                    assistant: "Welcome back to the project.".to_string(),
                },
                Exchange {
                    user: "add tests for the lexer".to_string(),
                    assistant: "Added lexer tests.".to_string(),
                },
            ]
        );
    }

    #[test]
    fn long_sessions_are_bookended() {
        let mut builder = SessionBuilder::new();
        for i in 0..30 {
            builder.user(&format!("request number {i}"));
            builder.assistant(&format!("Handled request {i}."));
        }
        let recap = render_recap(&builder.build(), 10);
        assert!(recap.contains("    1.  request number 0\n"));
        assert!(recap.contains("    4.  request number 3\n"));
        assert!(!recap.contains("request number 4\n"));
        assert!(recap.contains("... 21 exchanges skipped ..."));
        assert!(!recap.contains("request number 24\n"));
        assert!(recap.contains("   26.  request number 25\n"));
        assert!(recap.contains("   30.  request number 29\n"));
    }

    #[test]
    fn empty_session_renders_nothing() {
        assert!(render_recap(&[], DEFAULT_MAX_TURNS).is_empty());
    }
}
