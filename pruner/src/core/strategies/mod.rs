//! Built-in reduction strategies.
//!
//! Every strategy is a pure function `(messages, config) -> StrategyResult`.
//! Strategies propose actions; the pipeline decides whether to apply them.
//! A strategy never reorders messages and never touches `uuid`/`parentUuid`.

pub mod documents;
pub mod file_history;
pub mod mega_block;
pub mod metadata;
pub mod progress;
pub mod reminders;
pub mod stale_reads;
pub mod thinking;
pub mod tool_output;

use crate::core::protection::is_protected;
use crate::session::Message;

/// Messages a strategy may consider at all.
pub(crate) fn candidates(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages.iter().filter(|message| !is_protected(message))
}

/// Room left under a size cap for the trailer note.
const NOTE_RESERVE: usize = 128;

/// Cut `text` so that the result, trailer note included, fits in `max_bytes`
/// and (when given) `max_lines`.
pub(crate) fn truncate_with_note(
    text: &str,
    max_bytes: usize,
    max_lines: Option<usize>,
    what: &str,
) -> String {
    let budget = max_bytes.saturating_sub(NOTE_RESERVE);
    let mut end = 0usize;
    for (count, line) in text.split_inclusive('\n').enumerate() {
        if max_lines.is_some_and(|limit| count + 1 >= limit) {
            break;
        }
        if end + line.len() > budget {
            // Partial last line, cut on a char boundary.
            let mut cut = budget;
            while cut > end && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            end = cut;
            break;
        }
        end += line.len();
    }
    let head = text[..end].trim_end_matches('\n');
    let dropped = text.len() - head.len();
    format!("{head}\n[pruner: trimmed {dropped} bytes of {what}]")
}

pub(crate) fn line_count(text: &str) -> usize {
    text.lines().count()
}
