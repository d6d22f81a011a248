//! Action filtering.
//!
//! A [`FilterRule`] decides which actions are exposed to the observer. Rules come
//! from one of two sources: the bridge's static configuration (local) or the
//! process-wide options (global). A local rule fully shadows the global one.

use regex::Regex;
use tracing::warn;

use crate::action::Action;
use crate::config::{BridgeConfig, GlobalOptions};
use crate::error::ConfigError;
use crate::history::HistoryRecord;

/// Compiled allow/deny patterns matched against an action's `type`.
#[derive(Debug, Clone, Default)]
pub struct FilterRule {
    whitelist: Option<Regex>,
    blacklist: Option<Regex>,
}

impl FilterRule {
    /// Compiles a rule. Empty pattern strings are treated as absent.
    pub fn new(whitelist: Option<&str>, blacklist: Option<&str>) -> Result<Self, ConfigError> {
        Ok(Self {
            whitelist: compile(whitelist)?,
            blacklist: compile(blacklist)?,
        })
    }

    /// Builds the local rule from a bridge configuration, joining each list into
    /// one alternation. Returns `None` when neither list was supplied.
    pub fn from_config(config: &BridgeConfig) -> Result<Option<Self>, ConfigError> {
        if !config.has_local_filter() {
            return Ok(None);
        }
        let whitelist = config.actions_whitelist.as_ref().map(|p| p.join("|"));
        let blacklist = config.actions_blacklist.as_ref().map(|p| p.join("|"));
        Self::new(whitelist.as_deref(), blacklist.as_deref()).map(Some)
    }

    /// The whitelist pattern source, if any.
    #[must_use]
    pub fn whitelist(&self) -> Option<&str> {
        self.whitelist.as_ref().map(Regex::as_str)
    }

    /// The blacklist pattern source, if any.
    #[must_use]
    pub fn blacklist(&self) -> Option<&str> {
        self.blacklist.as_ref().map(Regex::as_str)
    }

    /// True when the action must not be exposed.
    #[must_use]
    pub fn is_excluded(&self, action: &Action) -> bool {
        is_excluded(action, self)
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>, ConfigError> {
    match pattern {
        None | Some("") => Ok(None),
        Some(p) => Regex::new(p).map(Some).map_err(|e| ConfigError::InvalidPattern {
            pattern: p.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Returns true iff a whitelist is set and the type fails it, or a blacklist is
/// set and the type matches it. Only `action.kind` is inspected.
#[must_use]
pub fn is_excluded(action: &Action, rule: &FilterRule) -> bool {
    let kind = action.kind.as_str();
    rule.whitelist.as_ref().is_some_and(|re| !re.is_match(kind))
        || rule.blacklist.as_ref().is_some_and(|re| re.is_match(kind))
}

/// Returns a copy of `history` keeping only non-excluded positions.
///
/// `staged_action_ids` and `computed_states` are filtered in lock-step. Ids with
/// no recorded action are kept.
#[must_use]
pub fn project_history(history: &HistoryRecord, rule: &FilterRule) -> HistoryRecord {
    let mut staged_action_ids = Vec::with_capacity(history.staged_action_ids.len());
    let mut computed_states = Vec::with_capacity(history.computed_states.len());

    for (id, computed) in history.staged_action_ids.iter().zip(&history.computed_states) {
        let excluded = history.action(*id).is_some_and(|action| is_excluded(action, rule));
        if !excluded {
            staged_action_ids.push(*id);
            computed_states.push(computed.clone());
        }
    }

    HistoryRecord {
        staged_action_ids,
        computed_states,
        actions_by_id: history.actions_by_id.clone(),
        current_state_index: history.current_state_index,
        next_action_id: history.next_action_id,
        skipped_action_ids: history.skipped_action_ids.clone(),
        committed_state: history.committed_state.clone(),
    }
}

/// Resolves the active rule: the local one if configured, else the global one.
///
/// The compiled global rule is cached until the option strings change.
#[derive(Debug, Default)]
pub struct FilterResolver {
    local: Option<FilterRule>,
    global: Option<CachedGlobal>,
}

#[derive(Debug)]
struct CachedGlobal {
    whitelist: Option<String>,
    blacklist: Option<String>,
    rule: Option<FilterRule>,
}

impl FilterResolver {
    /// Creates a resolver; a local rule, when given, always wins.
    #[must_use]
    pub fn new(local: Option<FilterRule>) -> Self {
        Self { local, global: None }
    }

    /// The rule that applies under `options`, or `None` when filtering is off.
    pub fn resolve(&mut self, options: &GlobalOptions) -> Option<&FilterRule> {
        if self.local.is_some() {
            return self.local.as_ref();
        }
        if !options.filter {
            return None;
        }

        let stale = self.global.as_ref().map_or(true, |cached| {
            cached.whitelist != options.whitelist || cached.blacklist != options.blacklist
        });
        if stale {
            let rule = match FilterRule::new(options.whitelist.as_deref(), options.blacklist.as_deref()) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    warn!(error = %err, "ignoring invalid global action filter");
                    None
                }
            };
            self.global = Some(CachedGlobal {
                whitelist: options.whitelist.clone(),
                blacklist: options.blacklist.clone(),
                rule,
            });
        }

        self.global.as_ref().and_then(|cached| cached.rule.as_ref())
    }
}
