//! Given a target, chooses the rule (and stem) that builds it: exact
//! rules first, then pattern rules by shortest-stem, then match-anything
//! rules, with implicit-chain search threaded through pattern
//! prerequisites that don't yet exist. Per §4.F.

use std::path::Path;

use crate::error::ResolveError;
use crate::rule::Rule;
use crate::ruletable::RuleTable;
use crate::world::FileSystem;

/// The resolved rule(s) for one target: usually a single `Rule`, or an
/// ordered list of independent rules for a double-colon target.
pub enum Resolved {
    None,
    One(Rule),
    DoubleColon(Vec<Rule>),
}

pub struct Resolver<'a> {
    table: &'a RuleTable,
    fs: &'a dyn FileSystem,
}

impl<'a> Resolver<'a> {
    pub fn new(table: &'a RuleTable, fs: &'a dyn FileSystem) -> Self {
        Self { table, fs }
    }

    /// Prerequisites contributed by rules that have no recipe of their
    /// own: accumulated unconditionally regardless of what `find_rule`
    /// returns.
    pub fn prereq_only_contributions(&self, target: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(rules) = self.table.exact_rules.get(target) {
            for rule in rules.iter().filter(|r| !r.has_recipe()) {
                out.extend(rule.prerequisites.iter().cloned());
            }
        }
        for rule in &self.table.pattern_rules {
            if rule.has_recipe() {
                continue;
            }
            let Some(pattern) = &rule.pattern else { continue };
            if let Some(stem) = match_pattern(pattern, target) {
                out.extend(rule.prerequisites.iter().map(|p| substitute_stem(p, &stem)));
            }
        }
        out
    }

    /// Resolves the recipe-bearing rule for `target`, per §4.F step 2.
    pub fn get_rule(&self, target: &str) -> Result<Resolved, ResolveError> {
        if let Some(rules) = self.table.exact_rules.get(target) {
            let recipe_rules: Vec<&Rule> = rules.iter().filter(|r| r.has_recipe()).collect();
            if !recipe_rules.is_empty() {
                if recipe_rules.iter().any(|r| r.double_colon) {
                    return Ok(Resolved::DoubleColon(recipe_rules.into_iter().cloned().collect()));
                }
                return Ok(Resolved::One(recipe_rules[0].clone()));
            }
        }

        let mut candidates: Vec<(usize, Rule)> = Vec::new();
        for rule in &self.table.pattern_rules {
            if !rule.has_recipe() {
                continue;
            }
            let Some(pattern) = &rule.pattern else { continue };
            if let Some(stem) = match_pattern(pattern, target) {
                let mut concrete = rule.clone();
                let stem_len = stem.len();
                concrete.stem = Some(stem);
                candidates.push((stem_len, concrete));
            }
        }
        // Stable sort: ties keep declaration order, per §8 "shortest-stem
        // selection ... ties broken by declaration order".
        candidates.sort_by_key(|(len, _)| *len);
        // `false` marks a pattern-rule candidate, `true` a match-anything one.
        let mut candidates: Vec<(Rule, bool)> = candidates.into_iter().map(|(_, r)| (r, false)).collect();

        for rule in &self.table.anything_rules {
            let mut concrete = rule.clone();
            concrete.stem = Some(target.to_string());
            candidates.push((concrete, true));
        }

        if candidates.is_empty() {
            return Ok(Resolved::None);
        }

        let known_type = Path::new(target)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .is_some_and(|ext| self.table.known_types.contains(&ext));

        for (candidate, _) in &candidates {
            let stem = candidate.stem.as_deref().unwrap_or("");
            let intermediates = self.missing_intermediates(candidate, stem);
            if intermediates.is_empty() {
                return Ok(Resolved::One(candidate.clone()));
            }
        }

        // Don't chain through match-anything rules for a target whose
        // extension is recognized by some pattern rule; pattern-rule
        // candidates still chain normally.
        for (candidate, is_anything) in &candidates {
            if *is_anything && known_type {
                continue;
            }
            if candidate.terminal {
                continue;
            }
            let stem = candidate.stem.as_deref().unwrap_or("");
            let intermediates = self.missing_intermediates(candidate, stem);
            if intermediates
                .iter()
                .all(|missing| matches!(self.get_rule(missing), Ok(Resolved::One(_)) | Ok(Resolved::DoubleColon(_))))
            {
                return Ok(Resolved::One(candidate.clone()));
            }
        }

        Ok(Resolved::None)
    }

    /// Pattern prerequisites, with stem substituted, that neither have a
    /// rule nor exist on disk.
    fn missing_intermediates(&self, rule: &Rule, stem: &str) -> Vec<String> {
        let mut missing = Vec::new();
        for prereq in &rule.prerequisites {
            let concrete = substitute_stem(prereq, stem);
            if self.fs.exists(Path::new(&concrete)) {
                continue;
            }
            if self.table.exact_rules.contains_key(concrete.as_str())
                || self
                    .table
                    .pattern_rules
                    .iter()
                    .any(|r| r.pattern.as_deref().is_some_and(|p| match_pattern(p, &concrete).is_some()))
            {
                continue;
            }
            missing.push(concrete);
        }
        missing
    }
}

/// Matches `target` against a `%`-pattern, returning the captured stem.
pub fn match_pattern(pattern: &str, target: &str) -> Option<String> {
    let (prefix, suffix) = pattern.split_once('%')?;
    let target = target.strip_prefix(prefix)?;
    let stem = target.strip_suffix(suffix)?;
    Some(stem.to_string())
}

/// Substitutes `%` in a (possibly prerequisite) word with `stem`.
pub fn substitute_stem(word: &str, stem: &str) -> String {
    if word.contains('%') { word.replace('%', stem) } else { word.to_string() }
}
