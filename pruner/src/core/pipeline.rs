//! Sequential strategy application with per-step invariant checks.
//!
//! Each strategy sees the sequence as left by the previous one. Actions on
//! protected messages are dropped with a warning, the rest are applied,
//! orphaned children are re-pointed, and the result must pass
//! [`enforce_invariants`] before the next strategy runs.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::core::invariants::enforce_invariants;
use crate::core::lineage::relink_orphans;
use crate::core::protection::protected_lines;
use crate::core::registry::Prescription;
use crate::core::types::{ActionKind, PruneAction, StrategyConfig, StrategyResult};
use crate::error::PruneError;
use crate::session::{Message, total_size};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// A failing strategy aborts the rest of the prescription.
    pub strict: bool,
    /// After a strict abort, the last validated state may still be persisted.
    pub persist_partial: bool,
}

/// One strategy's contribution to a run.
#[derive(Debug, Clone)]
pub struct StrategyRun {
    pub result: StrategyResult,
    /// Set when the strategy failed; its result is then empty.
    pub error: Option<String>,
}

/// Outcome of a whole prescription.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub prescription: String,
    pub before_bytes: usize,
    pub before_count: usize,
    /// Last validated sequence.
    pub messages: Vec<Message>,
    pub strategies: Vec<StrategyRun>,
    /// Why a strict run stopped early.
    pub aborted: Option<String>,
}

impl PipelineRun {
    pub fn after_bytes(&self) -> usize {
        total_size(&self.messages)
    }

    pub fn after_count(&self) -> usize {
        self.messages.len()
    }

    pub fn bytes_saved(&self) -> usize {
        self.before_bytes.saturating_sub(self.after_bytes())
    }

    /// True if any strategy applied an action.
    pub fn changed(&self) -> bool {
        self.strategies.iter().any(|run| !run.result.is_empty())
    }

    /// The failure that stopped a strict run.
    pub fn abort_error(&self) -> Option<PruneError> {
        self.aborted.as_ref()?;
        self.strategies.iter().find_map(|entry| {
            entry.error.as_ref().map(|detail| PruneError::Strategy {
                strategy: entry.result.strategy.clone(),
                detail: detail.clone(),
            })
        })
    }

    /// Whether the final state may be written back.
    pub fn may_persist(&self, options: PipelineOptions) -> bool {
        self.aborted.is_none() || options.persist_partial
    }
}

/// Run `prescription` over `messages`.
///
/// Returns [`PruneError::Integrity`] as soon as any strategy's output fails
/// validation; no partial state is returned in that case.
pub fn run_pipeline(
    messages: Vec<Message>,
    prescription: &Prescription,
    config: &StrategyConfig,
    options: PipelineOptions,
) -> Result<PipelineRun, PruneError> {
    let mut run = PipelineRun {
        prescription: prescription.name.clone(),
        before_bytes: total_size(&messages),
        before_count: messages.len(),
        messages,
        strategies: Vec::new(),
        aborted: None,
    };

    for descriptor in &prescription.strategies {
        let name = descriptor.name;
        let mut result = match (descriptor.run)(&run.messages, config) {
            Ok(result) => result,
            Err(err) => {
                warn!(strategy = name, error = %err, "strategy failed");
                run.strategies.push(StrategyRun {
                    result: StrategyResult::new(name),
                    error: Some(err.to_string()),
                });
                if options.strict {
                    run.aborted = Some(format!("strategy '{name}' failed: {err}"));
                    break;
                }
                continue;
            }
        };

        screen_actions(&run.messages, &mut result);
        let next = apply_actions(&run.messages, &result.actions);
        enforce_invariants(name, &run.messages, &next)?;

        result.bytes_saved = total_size(&run.messages).saturating_sub(total_size(&next));
        debug!(
            strategy = name,
            removed = result.removed,
            modified = result.modified,
            bytes_saved = result.bytes_saved,
            "strategy applied"
        );
        run.messages = next;
        run.strategies.push(StrategyRun {
            result,
            error: None,
        });
    }
    Ok(run)
}

/// Drop actions the pipeline must not apply, noting each as a warning.
fn screen_actions(messages: &[Message], result: &mut StrategyResult) {
    let protected = protected_lines(messages);
    let known: HashSet<usize> = messages.iter().map(|m| m.line).collect();
    let mut targeted = HashSet::new();
    let warnings = &mut result.warnings;

    result.actions.retain(|action| {
        let label = action.target_label();
        let problem = if protected.contains(&action.target) {
            Some("protected message")
        } else if !known.contains(&action.target) {
            Some("unknown message")
        } else if !targeted.insert(action.target) {
            Some("message already targeted")
        } else if action.kind != ActionKind::Remove && action.replacement.is_none() {
            Some("edit without replacement")
        } else {
            None
        };
        match problem {
            Some(problem) => {
                warn!(action = %label, problem, "dropped action");
                warnings.push(format!("dropped action on {label}: {problem}"));
                false
            }
            None => true,
        }
    });
    result.recount();
}

/// Apply screened actions in place, then repair parent links.
fn apply_actions(messages: &[Message], actions: &[PruneAction]) -> Vec<Message> {
    let by_target: HashMap<usize, &PruneAction> =
        actions.iter().map(|action| (action.target, action)).collect();

    let mut next: Vec<Message> = messages
        .iter()
        .filter_map(|message| match by_target.get(&message.line) {
            None => Some(message.clone()),
            Some(action) => match (&action.kind, &action.replacement) {
                (ActionKind::Remove, _) => None,
                (_, Some(replacement)) => {
                    let mut replacement = replacement.clone();
                    replacement.line = message.line;
                    Some(replacement)
                }
                (_, None) => Some(message.clone()),
            },
        })
        .collect();
    relink_orphans(messages, &mut next);
    next
}
