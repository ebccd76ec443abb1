//! Intent Resolver
//!
//! Maps a raw command string to a known intent via case-insensitive
//! substring matching against a fixed rule table. Rules are evaluated top to
//! bottom and the first match wins, so the priority between overlapping
//! keywords is total: a command containing both "invoice ... ravi" and
//! "budget" resolves to `IssueInvoice`, never `FreezeBudget`.

use crate::models::Intent;

/// A single matching rule. Matches when every `all_of` substring appears in
/// the lowercased command and, if `any_of` is non-empty, at least one of its
/// substrings appears too.
struct MatchRule {
    intent: Intent,
    all_of: &'static [&'static str],
    any_of: &'static [&'static str],
}

/// Rule table in priority order; zero allocation.
const RULES: &[MatchRule] = &[
    MatchRule {
        intent: Intent::IssueInvoice,
        all_of: &["invoice", "ravi"],
        any_of: &[],
    },
    MatchRule {
        intent: Intent::DisbursePayments,
        all_of: &["pay", "farmer"],
        any_of: &[],
    },
    MatchRule {
        intent: Intent::FreezeBudget,
        all_of: &[],
        any_of: &["freeze", "budget"],
    },
];

impl MatchRule {
    fn matches(&self, command: &str) -> bool {
        self.all_of.iter().all(|kw| command.contains(kw))
            && (self.any_of.is_empty() || self.any_of.iter().any(|kw| command.contains(kw)))
    }
}

/// Intent resolver
pub struct IntentResolver;

impl IntentResolver {
    /// Resolve a command to an intent. Pure and deterministic; never fails.
    /// Worst case returns `Unclassified`.
    pub fn resolve(command: &str) -> Intent {
        let lowered = command.to_lowercase();

        RULES
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.intent)
            .unwrap_or(Intent::Unclassified)
    }
}
