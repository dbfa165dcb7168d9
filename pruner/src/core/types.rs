//! Shared deterministic types for pruning core logic.
//!
//! These types define stable contracts between strategies, the pipeline and
//! the invariant checks. They do not depend on external state or I/O.

use serde::{Deserialize, Serialize};

use crate::session::Message;

/// Risk classification. Strategy sets nest: gentle ⊂ standard ⊂ aggressive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Gentle,
    Standard,
    Aggressive,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Gentle, Tier::Standard, Tier::Aggressive];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Gentle => "gentle",
            Tier::Standard => "standard",
            Tier::Aggressive => "aggressive",
        }
    }

    pub fn from_name(name: &str) -> Option<Tier> {
        Tier::ALL.into_iter().find(|tier| tier.as_str() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Drop the message from the sequence.
    Remove,
    /// Edit the message's content in place.
    Modify,
    /// Swap the message for a different record with the same identity.
    Replace,
}

/// One proposed edit against a single message.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneAction {
    /// Line of the targeted message.
    pub target: usize,
    pub target_id: Option<String>,
    pub kind: ActionKind,
    pub before_size: usize,
    pub after_size: usize,
    pub reason: String,
    /// New record for `Modify` / `Replace`.
    pub replacement: Option<Message>,
}

impl PruneAction {
    pub fn remove(message: &Message, reason: impl Into<String>) -> Self {
        Self {
            target: message.line,
            target_id: message.id().map(str::to_string),
            kind: ActionKind::Remove,
            before_size: message.size(),
            after_size: 0,
            reason: reason.into(),
            replacement: None,
        }
    }

    pub fn modify(message: &Message, replacement: Message, reason: impl Into<String>) -> Self {
        Self::with_replacement(message, replacement, ActionKind::Modify, reason.into())
    }

    pub fn replace(message: &Message, replacement: Message, reason: impl Into<String>) -> Self {
        Self::with_replacement(message, replacement, ActionKind::Replace, reason.into())
    }

    fn with_replacement(
        message: &Message,
        replacement: Message,
        kind: ActionKind,
        reason: String,
    ) -> Self {
        Self {
            target: message.line,
            target_id: message.id().map(str::to_string),
            kind,
            before_size: message.size(),
            after_size: replacement.size(),
            reason,
            replacement: Some(replacement),
        }
    }

    pub fn saved(&self) -> usize {
        self.before_size.saturating_sub(self.after_size)
    }

    /// Label used in logs and integrity errors.
    pub fn target_label(&self) -> String {
        match &self.target_id {
            Some(id) => format!("line {} ({id})", self.target),
            None => format!("line {}", self.target),
        }
    }
}

/// Outcome of one strategy over one sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StrategyResult {
    pub strategy: String,
    pub actions: Vec<PruneAction>,
    /// Bytes saved. Strategies record their estimate; the pipeline replaces it
    /// with the measured delta once the actions are applied.
    pub bytes_saved: usize,
    pub removed: usize,
    pub modified: usize,
    pub warnings: Vec<String>,
}

impl StrategyResult {
    pub fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, action: PruneAction) {
        self.bytes_saved += action.saved();
        match action.kind {
            ActionKind::Remove => self.removed += 1,
            ActionKind::Modify | ActionKind::Replace => self.modified += 1,
        }
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Recount removed/modified after actions were filtered.
    pub(crate) fn recount(&mut self) {
        self.removed = self
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Remove)
            .count();
        self.modified = self.actions.len() - self.removed;
        self.bytes_saved = self.actions.iter().map(PruneAction::saved).sum();
    }
}

/// Per-strategy options, stored under `[strategies]` in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StrategyConfig {
    pub tool_output: ToolOutputConfig,
    pub thinking: ThinkingConfig,
    pub mega_block: MegaBlockConfig,
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tool_output.truncate_threshold < MIN_TRIM_CAP {
            return Err(format!(
                "strategies.tool_output.truncate_threshold must be >= {MIN_TRIM_CAP}"
            ));
        }
        if self.tool_output.max_lines < 2 {
            return Err("strategies.tool_output.max_lines must be >= 2".to_string());
        }
        if self.thinking.keep_chars < 16 {
            return Err("strategies.thinking.keep_chars must be >= 16".to_string());
        }
        if self.mega_block.threshold < MIN_TRIM_CAP {
            return Err(format!(
                "strategies.mega_block.threshold must be >= {MIN_TRIM_CAP}"
            ));
        }
        Ok(())
    }
}

/// Smallest accepted size cap; the trailer note must fit under it.
pub const MIN_TRIM_CAP: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolOutputConfig {
    /// Tool results above this many bytes are trimmed.
    pub truncate_threshold: usize,
    /// Tool results above this many lines are trimmed.
    pub max_lines: usize,
    pub mode: TrimMode,
}

impl Default for ToolOutputConfig {
    fn default() -> Self {
        Self {
            truncate_threshold: 8 * 1024,
            max_lines: 100,
            mode: TrimMode::Truncate,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrimMode {
    /// Keep the head of the output up to the cap.
    Truncate,
    /// Replace the whole output with a placeholder.
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThinkingConfig {
    pub mode: ThinkingMode,
    /// Characters kept by `truncate` mode.
    pub keep_chars: usize,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            mode: ThinkingMode::Remove,
            keep_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ThinkingMode {
    Remove,
    Truncate,
    SignatureOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MegaBlockConfig {
    pub threshold: usize,
}

impl Default for MegaBlockConfig {
    fn default() -> Self {
        Self {
            threshold: 32 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_order_by_risk() {
        assert!(Tier::Gentle < Tier::Standard);
        assert!(Tier::Standard < Tier::Aggressive);
        assert_eq!(Tier::from_name("standard"), Some(Tier::Standard));
        assert_eq!(Tier::from_name("reckless"), None);
    }

    #[test]
    fn default_strategy_config_is_valid() {
        assert!(StrategyConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_caps_below_minimum() {
        let mut config = StrategyConfig::default();
        config.tool_output.truncate_threshold = 10;
        assert!(
            config
                .validate()
                .expect_err("threshold")
                .contains("truncate_threshold")
        );

        let mut config = StrategyConfig::default();
        config.thinking.keep_chars = 3;
        assert!(config.validate().expect_err("keep_chars").contains("keep_chars"));
    }
}
