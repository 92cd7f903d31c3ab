//! Rolling context state and its compaction rules.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use storyloom_core::model::ArtifactType;
use uuid::Uuid;

/// Tuning knobs for compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingContextConfig {
    /// Maximum runes kept from a single appended turn.
    pub turn_rune_budget: usize,
    /// Turn count above which older turns are rolled into the summary.
    pub trigger_threshold: usize,
    /// Recent turns kept verbatim once compaction has started.
    pub keep: usize,
    /// Maximum runes of the summary; the most recent material survives.
    pub summary_rune_budget: usize,
    /// Cache expiry for a context entry.
    pub ttl: Duration,
}

impl Default for RollingContextConfig {
    fn default() -> Self {
        Self {
            turn_rune_budget: 400,
            trigger_threshold: 12,
            keep: 6,
            summary_rune_budget: 2000,
            ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Identifies one rolling context: a task within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub session_id: Uuid,
    pub task: ArtifactType,
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rolling_ctx:{}:{}:{}:{}",
            self.tenant_id, self.project_id, self.session_id, self.task
        )
    }
}

/// What the generation call receives as prior context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub summary: String,
    /// Recent user turns, one per line, oldest first.
    pub recent_turns_text: String,
}

/// Cache-resident context. Not a system of record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingState {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub recent_user_turns: Vec<String>,
    #[serde(default)]
    pub turn_count: u64,
}

impl RollingState {
    /// The state as prior context, before any further append.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            summary: self.summary.clone(),
            recent_turns_text: self.recent_user_turns.join("\n"),
        }
    }

    /// Appends one user prompt and recompacts.
    pub fn append(&mut self, prompt: &str, config: &RollingContextConfig) {
        let turn = truncate_head(prompt.trim(), config.turn_rune_budget);
        self.recent_user_turns.push(turn);
        self.turn_count += 1;
        self.compact(config);
    }

    fn compact(&mut self, config: &RollingContextConfig) {
        let threshold = u64::try_from(config.trigger_threshold).unwrap_or(u64::MAX);
        if self.turn_count <= threshold {
            let excess = self
                .recent_user_turns
                .len()
                .saturating_sub(config.trigger_threshold);
            self.recent_user_turns.drain(..excess);
            return;
        }

        let rolled = self.recent_user_turns.len().saturating_sub(config.keep);
        if rolled == 0 {
            return;
        }
        for turn in self.recent_user_turns.drain(..rolled) {
            self.summary.push_str("- ");
            self.summary.push_str(&turn);
            self.summary.push('\n');
        }
        self.summary = truncate_tail(&self.summary, config.summary_rune_budget);
    }
}

/// First `budget` runes of `text`.
fn truncate_head(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => text[..cut].to_owned(),
        None => text.to_owned(),
    }
}

/// Last `budget` runes of `text`.
fn truncate_tail(text: &str, budget: usize) -> String {
    let total = text.chars().count();
    if total <= budget {
        return text.to_owned();
    }
    match text.char_indices().nth(total - budget) {
        Some((cut, _)) => text[cut..].to_owned(),
        None => String::new(),
    }
}
