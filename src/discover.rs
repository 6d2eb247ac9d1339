//! Lazy build-graph construction: walks goals through the [`Resolver`],
//! turning resolved rules into [`BuildNode`]s, inserting `.WAIT` barrier
//! nodes and `.NOTPARALLEL` dependency chains, and memoizing one node per
//! target so that shared prerequisites are only discovered once.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::cache::Cache;
use crate::error::RunError;
use crate::expand::Expander;
use crate::graph::{BuildGraph, BuildId, BuildNode, GraphBuilder, RecipeLine};
use crate::resolver::{Resolved, Resolver, match_pattern, substitute_stem};
use crate::rule::{Rule, Scope, SpecialTarget, SpecialTargets};
use crate::ruletable::RuleTable;
use crate::value::{Origin, VariableValue};
use crate::world::PathResolver;

/// Everything the runner needs about a node beyond what [`BuildNode`]
/// carries: its per-target variable scope and pattern stem.
#[derive(Clone)]
pub struct NodeMeta {
    pub stem: Option<String>,
    pub scope: Rc<Scope>,
    pub notparallel: bool,
}

pub struct Discovery {
    pub graph: BuildGraph,
    pub meta: IndexMap<BuildId, NodeMeta>,
    pub goal_ids: Vec<BuildId>,
}

pub fn discover(
    goals: &[String],
    table: &RuleTable,
    resolver: &Resolver<'_>,
    expander: &Expander<'_>,
    special: &SpecialTargets,
    path_resolver: &dyn PathResolver,
    cache: &Cache,
) -> Result<Discovery, RunError> {
    let mut ctx = DiscoverCtx {
        builder: GraphBuilder::new(),
        meta: IndexMap::new(),
        visited: HashMap::new(),
        table,
        resolver,
        expander,
        special,
        path_resolver,
        cache,
    };

    let mut goal_ids = Vec::new();
    for goal in goals {
        goal_ids.push(ctx.discover_target(goal)?);
    }

    Ok(Discovery {
        graph: ctx.builder.build(),
        meta: ctx.meta,
        goal_ids,
    })
}

struct DiscoverCtx<'a> {
    builder: GraphBuilder,
    meta: IndexMap<BuildId, NodeMeta>,
    visited: HashMap<String, BuildId>,
    table: &'a RuleTable,
    resolver: &'a Resolver<'a>,
    expander: &'a Expander<'a>,
    special: &'a SpecialTargets,
    path_resolver: &'a dyn PathResolver,
    cache: &'a Cache,
}

impl DiscoverCtx<'_> {
    fn discover_target(&mut self, target: &str) -> Result<BuildId, RunError> {
        if let Some(id) = self.visited.get(target) {
            return Ok(*id);
        }

        let extra_prereqs = self.resolver.prereq_only_contributions(target);
        let resolved = self.resolver.get_rule(target)?;

        let id = match resolved {
            Resolved::None => self.build_leaf(target, extra_prereqs)?,
            Resolved::One(rule) => self.build_rule_node(target, rule, extra_prereqs)?,
            Resolved::DoubleColon(rules) => self.build_double_colon(target, rules, extra_prereqs)?,
        };

        for name in self.node_target_names(id) {
            self.visited.insert(name, id);
        }
        self.visited.insert(target.to_string(), id);
        Ok(id)
    }

    /// The recipe-bearing `.DEFAULT` rule, if one was defined, consulted by
    /// [`Self::build_leaf`] before a target with no applicable rule is
    /// treated as a missing-file error.
    fn default_rule(&self) -> Option<Rule> {
        self.table
            .exact_rules
            .get(".DEFAULT")
            .and_then(|rules| rules.iter().find(|r| !r.recipe.is_empty()))
            .cloned()
    }

    fn node_target_names(&self, id: BuildId) -> Vec<String> {
        self.builder
            .lookup_build(id)
            .map(|n| n.targets.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }

    fn build_leaf(&mut self, target: &str, extra_prereqs: Vec<String>) -> Result<BuildId, RunError> {
        if let Some(rule) = self.default_rule() {
            return self.build_rule_node(target, rule, extra_prereqs);
        }

        let prerequisites = extra_prereqs;
        for p in &prerequisites {
            self.discover_target(p)?;
        }
        let node = BuildNode {
            targets: vec![SmolStr::new(target)],
            outs: vec![self.builder.add_file(target)],
            prerequisites: prerequisites.clone(),
            order_only: Vec::new(),
            recipe: Vec::new(),
            phony: self.special.contains(SpecialTarget::Phony, target),
            barrier: false,
            oneshell: false,
            always_rebuild: false,
        };
        let id = self.builder.add_build(node);
        self.meta.insert(
            id,
            NodeMeta {
                stem: None,
                scope: Rc::new(Scope::new()),
                notparallel: false,
            },
        );
        self.link_prereqs(id, &prerequisites, &[])?;
        Ok(id)
    }

    fn build_rule_node(&mut self, target: &str, rule: Rule, extra_prereqs: Vec<String>) -> Result<BuildId, RunError> {
        let stem = rule.stem.clone();
        let scope = self.scope_for(target, rule.pattern.as_deref());

        let mut prerequisites: Vec<String> = rule
            .prerequisites
            .iter()
            .map(|p| substitute_stem(p, stem.as_deref().unwrap_or("")))
            .collect();
        let mut order_only: Vec<String> = rule
            .order_only
            .iter()
            .map(|p| substitute_stem(p, stem.as_deref().unwrap_or("")))
            .collect();

        if self.special.contains(SpecialTarget::SecondExpansion, target) {
            prerequisites = self.second_expand(&prerequisites, target, stem.as_deref());
            order_only = self.second_expand(&order_only, target, stem.as_deref());
        }

        prerequisites.extend(extra_prereqs);
        if let Some(more) = scope.variables.get(".EXTRA_PREREQS") {
            prerequisites.extend(self.expander.expand(&more.value).split_whitespace().map(str::to_string));
        }

        let targets = if rule.targets.len() > 1 {
            rule.targets.clone()
        } else {
            vec![SmolStr::new(target)]
        };

        let node = BuildNode {
            outs: targets.iter().map(|t| self.builder.add_file(t.as_str())).collect(),
            targets,
            prerequisites: prerequisites.clone(),
            order_only: order_only.clone(),
            recipe: rule.recipe.iter().map(|l| parse_recipe_line(l)).collect(),
            phony: self.special.contains(SpecialTarget::Phony, target),
            barrier: false,
            oneshell: self.special.contains(SpecialTarget::OneShell, target),
            always_rebuild: false,
        };
        let id = self.builder.add_build(node);
        let notparallel = self.special.contains(SpecialTarget::NotParallel, target);
        self.meta.insert(id, NodeMeta { stem, scope, notparallel });

        self.link_prereqs(id, &prerequisites, &order_only)?;
        Ok(id)
    }

    fn build_double_colon(
        &mut self,
        target: &str,
        rules: Vec<Rule>,
        extra_prereqs: Vec<String>,
    ) -> Result<BuildId, RunError> {
        let mut members = Vec::new();
        for rule in rules {
            members.push(self.build_rule_node(target, rule, extra_prereqs.clone())?);
        }
        if members.len() == 1 {
            return Ok(members[0]);
        }
        let barrier = self.builder.add_build(BuildNode::barrier());
        for m in members {
            self.builder.add_build_dep(barrier, m);
        }
        self.meta.insert(
            barrier,
            NodeMeta {
                stem: None,
                scope: Rc::new(Scope::new()),
                notparallel: false,
            },
        );
        Ok(barrier)
    }

    /// Expands the (first-pass) prerequisite text again with `$@`/`$*`
    /// bound, per §4.G step 3.
    fn second_expand(&self, words: &[String], target: &str, stem: Option<&str>) -> Vec<String> {
        let mut overlay = Scope::new();
        overlay.insert("@".into(), VariableValue::simple(target, Origin::Automatic));
        overlay.insert(
            "*".into(),
            VariableValue::simple(stem.unwrap_or_default(), Origin::Automatic),
        );
        let sub = self.expander.clone().with(Rc::new(overlay));
        let joined = words.join(" ");
        sub.expand(&joined).split_whitespace().map(str::to_string).collect()
    }

    /// Exact scopes win; otherwise the first pattern scope whose pattern
    /// matches `target`, in declaration order (mirroring the Resolver's own
    /// tie handling).
    fn scope_for(&self, target: &str, _pattern: Option<&str>) -> Rc<Scope> {
        if let Some(s) = self.table.exact_scopes.get(target) {
            return Rc::new(s.clone());
        }
        for (pattern, scope) in &self.table.pattern_scopes {
            if match_pattern(pattern, target).is_some() {
                return Rc::new(scope.clone());
            }
        }
        Rc::new(Scope::new())
    }

    fn link_prereqs(&mut self, dependent: BuildId, normal: &[String], order_only: &[String]) -> Result<(), RunError> {
        let notparallel = self.meta.get(&dependent).is_some_and(|m| m.notparallel);

        let resolved_normal: Vec<String> = normal
            .iter()
            .map(|p| self.resolve_path(p))
            .filter(|p| p != ".WAIT")
            .collect();
        let wait_segments = split_on_wait(normal, |p| self.resolve_path(p));

        if notparallel {
            let mut prev: Option<BuildId> = None;
            for p in &resolved_normal {
                let id = self.discover_target(p)?;
                self.builder.add_build_dep(dependent, id);
                if let Some(prev_id) = prev {
                    self.builder.add_build_dep(id, prev_id);
                }
                prev = Some(id);
            }
        } else if wait_segments.len() > 1 {
            let mut prev_barrier: Option<BuildId> = None;
            for segment in &wait_segments {
                let mut ids = Vec::new();
                for p in segment {
                    let id = self.discover_target(p)?;
                    self.builder.add_build_dep(dependent, id);
                    if let Some(pb) = prev_barrier {
                        self.builder.add_build_dep(id, pb);
                    }
                    ids.push(id);
                }
                let barrier = self.builder.add_build(BuildNode::barrier());
                for id in ids {
                    self.builder.add_build_dep(barrier, id);
                }
                self.meta.insert(
                    barrier,
                    NodeMeta {
                        stem: None,
                        scope: Rc::new(Scope::new()),
                        notparallel: false,
                    },
                );
                prev_barrier = Some(barrier);
            }
        } else {
            for p in &resolved_normal {
                let id = self.discover_target(p)?;
                self.builder.add_build_dep(dependent, id);
            }
        }

        for p in order_only {
            let resolved = self.resolve_path(p);
            let id = self.discover_target(&resolved)?;
            self.builder.add_build_dep(dependent, id);
        }

        Ok(())
    }

    fn resolve_path(&self, file: &str) -> String {
        self.cache
            .resolve(self.path_resolver, file)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| file.to_string())
    }
}

/// Splits a prerequisite word list on `.WAIT` sentinels into contiguous
/// segments, resolving each word through `resolve` as it goes.
fn split_on_wait(words: &[String], mut resolve: impl FnMut(&str) -> String) -> Vec<Vec<String>> {
    let mut segments = vec![Vec::new()];
    for w in words {
        if w == ".WAIT" {
            segments.push(Vec::new());
            continue;
        }
        segments.last_mut().unwrap().push(resolve(w));
    }
    segments.retain(|s| !s.is_empty());
    if segments.is_empty() {
        segments.push(Vec::new());
    }
    segments
}

fn parse_recipe_line(raw: &str) -> RecipeLine {
    let mut silent = false;
    let mut ignore_error = false;
    let mut always_run = false;
    let mut rest = raw;
    loop {
        let mut trimmed_any = false;
        if let Some(r) = rest.strip_prefix('@') {
            silent = true;
            rest = r;
            trimmed_any = true;
        } else if let Some(r) = rest.strip_prefix('-') {
            ignore_error = true;
            rest = r;
            trimmed_any = true;
        } else if let Some(r) = rest.strip_prefix('+') {
            always_run = true;
            rest = r;
            trimmed_any = true;
        }
        if !trimmed_any {
            break;
        }
    }
    RecipeLine {
        text: rest.to_string(),
        silent,
        ignore_error,
        always_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_splits_segments() {
        let words = vec!["a".to_string(), "b".to_string(), ".WAIT".to_string(), "c".to_string()];
        let segments = split_on_wait(&words, |s| s.to_string());
        assert_eq!(segments, vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]);
    }

    #[test]
    fn recipe_line_flags() {
        let line = parse_recipe_line("@-+echo hi");
        assert!(line.silent && line.ignore_error && line.always_run);
        assert_eq!(line.text, "echo hi");
    }
}
