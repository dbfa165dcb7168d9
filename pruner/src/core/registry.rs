//! Static strategy table and prescription resolution.
//!
//! Tiers nest: every strategy enabled by `gentle` is also enabled by
//! `standard`, and `standard` by `aggressive`. Resolution returns strategies
//! in table order, which is the order they run in.

use std::collections::{BTreeMap, HashSet};

use crate::core::strategies::{
    documents, file_history, mega_block, metadata, progress, reminders, stale_reads, thinking,
    tool_output,
};
use crate::core::types::{StrategyConfig, StrategyResult, Tier};
use crate::error::{PruneError, StrategyError};
use crate::session::Message;

pub type StrategyFn = fn(&[Message], &StrategyConfig) -> Result<StrategyResult, StrategyError>;

/// Registration record for one strategy.
#[derive(Debug, Clone, Copy)]
pub struct StrategyDescriptor {
    pub name: &'static str,
    /// Lowest tier that enables this strategy.
    pub tier: Tier,
    pub description: &'static str,
    /// Typical share of session bytes reclaimed.
    pub estimate: &'static str,
    pub run: StrategyFn,
}

pub static STRATEGIES: &[StrategyDescriptor] = &[
    StrategyDescriptor {
        name: progress::NAME,
        tier: Tier::Gentle,
        description: "collapse consecutive progress ticks into one marker",
        estimate: "5-20%",
        run: progress::run,
    },
    StrategyDescriptor {
        name: file_history::NAME,
        tier: Tier::Gentle,
        description: "keep only the latest file-history snapshot per message",
        estimate: "1-5%",
        run: file_history::run,
    },
    StrategyDescriptor {
        name: metadata::NAME,
        tier: Tier::Gentle,
        description: "strip verbose usage detail from assistant metadata",
        estimate: "1-3%",
        run: metadata::run,
    },
    StrategyDescriptor {
        name: thinking::NAME,
        tier: Tier::Standard,
        description: "remove or shorten extended thinking blocks",
        estimate: "5-25%",
        run: thinking::run,
    },
    StrategyDescriptor {
        name: tool_output::NAME,
        tier: Tier::Standard,
        description: "cap large tool results by bytes and lines",
        estimate: "10-40%",
        run: tool_output::run,
    },
    StrategyDescriptor {
        name: stale_reads::NAME,
        tier: Tier::Standard,
        description: "replace file reads superseded by a later read",
        estimate: "5-15%",
        run: stale_reads::run,
    },
    StrategyDescriptor {
        name: reminders::NAME,
        tier: Tier::Standard,
        description: "drop repeated system-reminder sections",
        estimate: "2-8%",
        run: reminders::run,
    },
    StrategyDescriptor {
        name: documents::NAME,
        tier: Tier::Aggressive,
        description: "replace repeated document and image attachments",
        estimate: "0-30%",
        run: documents::run,
    },
    StrategyDescriptor {
        name: mega_block::NAME,
        tier: Tier::Aggressive,
        description: "truncate oversized text blocks",
        estimate: "0-20%",
        run: mega_block::run,
    },
];

pub fn lookup(name: &str) -> Option<&'static StrategyDescriptor> {
    STRATEGIES.iter().find(|descriptor| descriptor.name == name)
}

/// Strategies enabled by `tier`, in run order.
pub fn tier_strategies(tier: Tier) -> Vec<&'static StrategyDescriptor> {
    STRATEGIES
        .iter()
        .filter(|descriptor| descriptor.tier <= tier)
        .collect()
}

/// A named, ordered list of strategies ready to run.
#[derive(Debug, Clone)]
pub struct Prescription {
    pub name: String,
    pub strategies: Vec<&'static StrategyDescriptor>,
}

impl Prescription {
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|d| d.name).collect()
    }
}

/// Resolve a built-in tier or a prescription defined in `custom`.
pub fn resolve_prescription(
    name: &str,
    custom: &BTreeMap<String, Vec<String>>,
) -> Result<Prescription, PruneError> {
    if let Some(tier) = Tier::from_name(name) {
        return Ok(Prescription {
            name: name.to_string(),
            strategies: tier_strategies(tier),
        });
    }
    let Some(names) = custom.get(name) else {
        let known = prescription_names(custom).join(", ");
        return Err(PruneError::config(format!(
            "unknown prescription '{name}' (known: {known})"
        )));
    };
    let strategies = names
        .iter()
        .map(|strategy| {
            lookup(strategy).ok_or_else(|| {
                PruneError::config(format!(
                    "prescription '{name}' names unknown strategy '{strategy}'"
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Prescription {
        name: name.to_string(),
        strategies,
    })
}

/// Built-in tiers followed by custom prescriptions.
pub fn prescription_names(custom: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    Tier::ALL
        .iter()
        .map(|tier| tier.as_str().to_string())
        .chain(custom.keys().cloned())
        .collect()
}

/// Check a strategy table: unique names, and every tier strictly larger than
/// the one below it.
pub fn validate_registry(table: &[StrategyDescriptor]) -> Vec<String> {
    let mut violations = Vec::new();
    let mut seen = HashSet::new();
    for descriptor in table {
        if !seen.insert(descriptor.name) {
            violations.push(format!("duplicate strategy name '{}'", descriptor.name));
        }
    }

    let counts: Vec<(Tier, usize)> = Tier::ALL
        .iter()
        .map(|&tier| (tier, table.iter().filter(|d| d.tier <= tier).count()))
        .collect();
    for pair in counts.windows(2) {
        let ((lower, lower_count), (upper, upper_count)) = (pair[0], pair[1]);
        if upper_count <= lower_count {
            violations.push(format!(
                "tier '{}' adds no strategies over '{}'",
                upper.as_str(),
                lower.as_str()
            ));
        }
    }
    if counts.first().is_some_and(|&(_, count)| count == 0) {
        violations.push("tier 'gentle' enables no strategies".to_string());
    }
    violations
}

/// Check custom prescriptions against the table. Tier names are reserved.
pub fn validate_custom_prescriptions(custom: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut violations = Vec::new();
    for (name, strategies) in custom {
        if Tier::from_name(name).is_some() {
            violations.push(format!("prescription '{name}' shadows a built-in tier"));
        }
        if strategies.is_empty() {
            violations.push(format!("prescription '{name}' lists no strategies"));
        }
        for strategy in strategies {
            if lookup(strategy).is_none() {
                violations.push(format!(
                    "prescription '{name}' names unknown strategy '{strategy}'"
                ));
            }
        }
    }
    violations
}
