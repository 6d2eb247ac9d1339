//! Post-parse rule index: exact targets, pattern table, anything-rules,
//! and the target-/pattern-scoped variable overlays. Built once at the
//! start of each run from the accumulated [`RuleEntry`] / scope records,
//! per §4.E.

use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;

use crate::expand::Expander;
use crate::rule::{Rule, RuleEntry, Scope};

#[derive(Default)]
pub struct RuleTable {
    /// Every rule whose target word, after expansion, contained no `%`.
    /// Ordinarily one non-recipe-bearing entry per target; more than one
    /// recipe-bearing entry only for double-colon targets.
    pub exact_rules: IndexMap<SmolStr, Vec<Rule>>,
    /// Pattern rules (`%` appears exactly once), excluding the bare `%`
    /// match-anything pattern.
    pub pattern_rules: Vec<Rule>,
    /// Rules whose target is the literal pattern `%`.
    pub anything_rules: Vec<Rule>,
    pub exact_scopes: IndexMap<String, Scope>,
    pub pattern_scopes: Vec<(String, Scope)>,
    /// Extensions appearing in any pattern rule's target (`.o`, `.c`, …),
    /// used to gate implicit-chain search onto known suffixes.
    pub known_types: IndexSet<String>,
}

impl RuleTable {
    pub fn build(entries: &[RuleEntry], scopes: &[(String, Scope)], expander: &Expander<'_>) -> Self {
        let mut table = RuleTable::default();

        for entry in entries {
            let targets_expanded = expander.expand(&entry.targets);
            let target_words: Vec<&str> = targets_expanded.split_whitespace().collect();
            if target_words.is_empty() {
                continue;
            }

            let prereqs_expanded = expander.expand(&entry.prerequisites);
            let (normal, order_only) = split_order_only(&prereqs_expanded);

            if target_words.len() == 1 && target_words[0] == ".SUFFIXES" {
                continue;
            }

            if entry.grouped {
                let rule = Rule {
                    targets: target_words.iter().map(|s| SmolStr::new(*s)).collect(),
                    prerequisites: normal.clone(),
                    order_only: order_only.clone(),
                    recipe: entry.recipe.clone(),
                    double_colon: entry.double_colon,
                    location: entry.location.clone(),
                    ..Default::default()
                };
                for word in &target_words {
                    table.insert_target_rule(word, rule.clone());
                }
                continue;
            }

            for word in &target_words {
                let rule = Rule {
                    targets: vec![SmolStr::new(*word)],
                    prerequisites: normal.clone(),
                    order_only: order_only.clone(),
                    recipe: entry.recipe.clone(),
                    double_colon: entry.double_colon,
                    location: entry.location.clone(),
                    ..Default::default()
                };
                table.insert_target_rule(word, rule);
            }
        }

        for (pattern, scope) in scopes {
            let expanded = expander.expand(pattern);
            for word in expanded.split_whitespace() {
                if word.contains('%') {
                    table.pattern_scopes.push((word.to_string(), scope.clone()));
                } else {
                    table.exact_scopes.insert(word.to_string(), scope.clone());
                }
            }
        }

        table
    }

    fn insert_target_rule(&mut self, word: &str, mut rule: Rule) {
        if word == "%" {
            rule.pattern = Some(SmolStr::new(word));
            rule.all = rule.prerequisites.is_empty() && rule.order_only.is_empty();
            self.anything_rules.push(rule);
            return;
        }
        if word.contains('%') {
            rule.pattern = Some(SmolStr::new(word));
            rule.terminal = rule.double_colon;
            if let Some(suffix) = known_suffix(word) {
                self.known_types.insert(suffix);
            }
            self.pattern_rules.push(rule);
            return;
        }
        self.exact_rules.entry(SmolStr::new(word)).or_default().push(rule);
    }
}

/// Splits an expanded prerequisite string on a lone top-level `|` into
/// (normal, order-only) word lists.
fn split_order_only(text: &str) -> (Vec<String>, Vec<String>) {
    let words: Vec<&str> = text.split_whitespace().collect();
    if let Some(idx) = words.iter().position(|w| *w == "|") {
        let normal = words[..idx].iter().map(|s| s.to_string()).collect();
        let order_only = words[idx + 1..].iter().map(|s| s.to_string()).collect();
        (normal, order_only)
    } else {
        (words.iter().map(|s| s.to_string()).collect(), Vec::new())
    }
}

/// Extracts the suffix (`.o`, `.c`, …) from a pattern word, if the `%`
/// appears at the start and is followed by a literal extension.
fn known_suffix(pattern: &str) -> Option<String> {
    let rest = pattern.strip_prefix('%')?;
    if rest.is_empty() || !rest.starts_with('.') {
        return None;
    }
    Some(rest.to_string())
}
