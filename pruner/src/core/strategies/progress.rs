//! `progress-collapse`: runs of consecutive progress ticks collapse to one marker.

use crate::core::protection::is_protected;
use crate::core::types::{PruneAction, StrategyConfig, StrategyResult};
use crate::error::StrategyError;
use crate::session::{Message, MessageKind};

pub const NAME: &str = "progress-collapse";

/// Keep the last tick of every run of two or more consecutive progress records.
pub fn run(messages: &[Message], _config: &StrategyConfig) -> Result<StrategyResult, StrategyError> {
    let mut result = StrategyResult::new(NAME);
    let mut streak: Vec<&Message> = Vec::new();

    for message in messages {
        if message.kind() == MessageKind::Progress && !is_protected(message) {
            streak.push(message);
        } else {
            collapse(&mut streak, &mut result);
        }
    }
    collapse(&mut streak, &mut result);
    Ok(result)
}

fn collapse(streak: &mut Vec<&Message>, result: &mut StrategyResult) {
    if let Some((marker, ticks)) = streak.split_last()
        && !ticks.is_empty()
    {
        for tick in ticks {
            result.push(PruneAction::remove(
                tick,
                format!("collapsed into progress marker at line {}", marker.line),
            ));
        }
    }
    streak.clear();
}
