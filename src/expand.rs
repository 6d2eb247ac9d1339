//! `$(...)`/`${...}`/`$x` expansion.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::warn;

use crate::error::ExpandError;
use crate::functions;
use crate::rule::Scope;
use crate::store::VariableStore;
use crate::world::Shell;

/// Recursion-depth bound from §4.A: exceeding it logs a warning and returns
/// the input unchanged rather than failing the build.
pub const MAX_EXPANSION_DEPTH: usize = 50;

/// Capabilities and ambient state the function library needs that are not
/// part of the variable model: the shell to run `shell`/`!=`, the
/// filesystem for `file`/`realpath`/`wildcard`, and an accumulator for
/// `warning`/`info` text so embedders can surface it without scraping
/// stdout.
pub struct ExpandContext<'a> {
    pub shell: &'a dyn Shell,
    pub shell_path: PathBuf,
    pub fs: &'a dyn crate::world::FileSystem,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub warnings: RefCell<Vec<String>>,
}

/// A chain of variable overlays consulted before the base store, most
/// recent first. Built with `with`/`withoutPrivate`; never mutated once
/// pushed, so sibling expanders can share a tail cheaply.
#[derive(Clone)]
enum OverlayChain {
    Base,
    Frame {
        scope: Rc<Scope>,
        hide_private: bool,
        parent: Rc<OverlayChain>,
    },
}

/// An immutable view over a [`VariableStore`] plus a stack of overlays.
///
/// `with(overlay)` and `without_private()` return a new `Expander` sharing
/// the parent's store and functions by reference; they never mutate the
/// parent, so concurrent reads from sibling builds are safe.
#[derive(Clone)]
pub struct Expander<'a> {
    store: &'a VariableStore,
    ctx: &'a ExpandContext<'a>,
    overlays: Rc<OverlayChain>,
}

impl<'a> Expander<'a> {
    pub fn new(store: &'a VariableStore, ctx: &'a ExpandContext<'a>) -> Self {
        Self {
            store,
            ctx,
            overlays: Rc::new(OverlayChain::Base),
        }
    }

    pub fn context(&self) -> &'a ExpandContext<'a> {
        self.ctx
    }

    /// Returns a view whose lookups consult `overlay` before the current
    /// chain.
    pub fn with(&self, overlay: Rc<Scope>) -> Self {
        Self {
            store: self.store,
            ctx: self.ctx,
            overlays: Rc::new(OverlayChain::Frame {
                scope: overlay,
                hide_private: false,
                parent: self.overlays.clone(),
            }),
        }
    }

    /// Returns a view that hides `private` entries from the current chain;
    /// used when descending into a prerequisite's own expansion.
    pub fn without_private(&self) -> Self {
        Self {
            store: self.store,
            ctx: self.ctx,
            overlays: Rc::new(OverlayChain::Frame {
                scope: Rc::new(Scope::new()),
                hide_private: true,
                parent: self.overlays.clone(),
            }),
        }
    }

    fn lookup_overlay(chain: &OverlayChain, name: &str, hiding: bool) -> Option<String> {
        match chain {
            OverlayChain::Base => None,
            OverlayChain::Frame {
                scope,
                hide_private,
                parent,
            } => {
                let now_hiding = hiding || *hide_private;
                if let Some(v) = scope.variables.get(name) {
                    if !(now_hiding && v.private) {
                        return Some(v.value.clone());
                    }
                }
                Self::lookup_overlay(parent, name, now_hiding)
            }
        }
    }

    /// Raw (unexpanded) value of `name`, honoring overlays, without
    /// re-expanding a recursive flavor's stored text.
    pub fn raw(&self, name: &str) -> Option<String> {
        if let Some(v) = Self::lookup_overlay(&self.overlays, name, false) {
            return Some(v);
        }
        self.store.get(name)
    }

    /// Full value of `name`: recursive flavor is expanded; simple is
    /// returned as stored. Automatic variables and overlay entries are
    /// always treated as already-resolved text.
    pub fn lookup(&self, name: &str) -> Option<String> {
        if let Some(v) = Self::lookup_overlay(&self.overlays, name, false) {
            return Some(v);
        }
        let value = self.store.get_value(name)?;
        if value.recursive {
            Some(self.expand_depth(&value.value, 0))
        } else {
            Some(value.value.clone())
        }
    }

    pub fn flavor(&self, name: &str) -> &'static str {
        if Self::lookup_overlay(&self.overlays, name, false).is_some() {
            return "recursive";
        }
        match self.store.get_value(name) {
            Some(v) => v.flavor(),
            None => "undefined",
        }
    }

    pub fn origin(&self, name: &str) -> &'static str {
        if Self::lookup_overlay(&self.overlays, name, false).is_some() {
            return crate::value::Origin::File.as_str();
        }
        match self.store.get_value(name) {
            Some(v) => v.origin.as_str(),
            None => crate::value::Origin::Undefined.as_str(),
        }
    }

    pub fn store(&self) -> &'a VariableStore {
        self.store
    }

    pub fn emit_warning(&self, text: impl Into<String>) {
        let text = text.into();
        warn!("{text}");
        self.ctx.warnings.borrow_mut().push(text);
    }

    /// Entry point: `expand(input) -> string`.
    pub fn expand(&self, input: &str) -> String {
        self.expand_depth(input, 0)
    }

    pub fn try_expand(&self, input: &str) -> Result<String, ExpandError> {
        Ok(self.expand_depth(input, 0))
    }

    /// Entry point for raw functions (`foreach`, `let`, `if`, `call`, `or`,
    /// `and`) that need to expand a sub-argument at a known recursion depth.
    pub fn expand_public(&self, input: &str, depth: usize) -> String {
        self.expand_depth(input, depth)
    }

    fn expand_depth(&self, input: &str, depth: usize) -> String {
        if depth >= MAX_EXPANSION_DEPTH {
            self.emit_warning(format!(
                "variable reference nesting exceeded {MAX_EXPANSION_DEPTH} levels, leaving unexpanded"
            ));
            return input.to_string();
        }

        let mut out = String::with_capacity(input.len());
        let bytes = input.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'$' {
                let ch_len = next_char_len(input, i);
                out.push_str(&input[i..i + ch_len]);
                i += ch_len;
                continue;
            }
            // at a '$'
            if i + 1 >= bytes.len() {
                out.push('$');
                i += 1;
                continue;
            }
            let next = bytes[i + 1];
            if next == b'$' {
                out.push('$');
                i += 2;
                continue;
            }
            if next == b'(' || next == b'{' {
                let open = next as char;
                let close = if open == '(' { ')' } else { '}' };
                let body_start = i + 2;
                let Some(body_end) = find_matching(input, body_start, open, close) else {
                    // Unterminated; copy through literally.
                    out.push_str(&input[i..]);
                    break;
                };
                let body = &input[body_start..body_end];
                let value = self.eval_body(body, depth);
                out.push_str(&value);
                i = body_end + 1;
            } else {
                // single-character variable reference
                let ch_len = next_char_len(input, i + 1);
                let name = &input[i + 1..i + 1 + ch_len];
                out.push_str(&self.lookup(name).unwrap_or_default());
                i += 1 + ch_len;
            }
        }
        out
    }

    fn eval_body(&self, body: &str, depth: usize) -> String {
        // 1. Substitution reference: name:pattern=replacement
        if let Some((name, pattern, replacement)) = split_subst_ref(body) {
            let expanded_name = self.expand_depth(name, depth + 1);
            let value = self.lookup(expanded_name.trim()).unwrap_or_default();
            let words: Vec<&str> = value.split_whitespace().collect();
            let pattern = self.expand_depth(pattern, depth + 1);
            let replacement = self.expand_depth(replacement, depth + 1);
            let pattern = if pattern.contains('%') {
                pattern
            } else {
                format!("%{pattern}")
            };
            let replacement = if replacement.contains('%') {
                replacement
            } else {
                format!("%{replacement}")
            };
            let subst: Vec<String> = words
                .iter()
                .map(|w| functions::patsubst_one(&pattern, &replacement, w))
                .collect();
            return subst.join(" ");
        }

        // 2. Function call: first whitespace-separated token is the name.
        if let Some((name, rest)) = split_function_call(body)
            && functions::is_known(name)
        {
            let raw_args = split_top_level_commas(rest);
            if functions::is_raw(name) {
                return functions::call(name, &raw_args, self, depth)
                    .unwrap_or_else(|e| self.recover(e));
            } else {
                let expanded_args: Vec<String> = raw_args
                    .iter()
                    .map(|a| self.expand_depth(a, depth + 1))
                    .collect();
                return functions::call(name, &expanded_args, self, depth)
                    .unwrap_or_else(|e| self.recover(e));
            }
        }

        // 3. Variable reference: expand the body as a name, then look up.
        let name = self.expand_depth(body, depth + 1);
        self.lookup(name.trim_end()).unwrap_or_default()
    }

    fn recover(&self, err: ExpandError) -> String {
        if matches!(err, ExpandError::UserError(_)) {
            // `error` is meant to propagate; we still recover locally per
            // §7 but surface it loudly.
            self.emit_warning(format!("{err}"));
        } else {
            self.emit_warning(format!("{err}"));
        }
        String::new()
    }
}

fn next_char_len(s: &str, byte_idx: usize) -> usize {
    s[byte_idx..]
        .chars()
        .next()
        .map(|c| c.len_utf8())
        .unwrap_or(1)
}

/// Finds the index of the `close` bracket matching the `open` bracket
/// implicitly opened just before `start`, honoring nested `$(...)`/`${...}`
/// and a backslash escape.
fn find_matching(s: &str, start: usize, open: char, close: char) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 1usize;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\\' && i + 1 < bytes.len() {
            i += 2;
            continue;
        }
        if c == b'$' && i + 1 < bytes.len() && (bytes[i + 1] == open as u8) {
            depth += 1;
            i += 2;
            continue;
        }
        if c == close as u8 {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += 1;
            continue;
        }
        let ch_len = next_char_len(s, i);
        i += ch_len;
    }
    None
}

/// Splits `name:pattern=replacement`, respecting `$(...)` balance so a
/// function call containing `:` or `=` is not misread.
fn split_subst_ref(body: &str) -> Option<(&str, &str, &str)> {
    let colon = find_top_level(body, ':')?;
    let after_colon = &body[colon + 1..];
    let eq = find_top_level(after_colon, '=')?;
    let name = &body[..colon];
    let pattern = &after_colon[..eq];
    let replacement = &after_colon[eq + 1..];
    if name.trim().is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, pattern, replacement))
}

fn find_top_level(s: &str, target: char) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, c) in s.char_indices() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth -= 1,
            c if c == target && depth == 0 => return Some(idx),
            _ => {}
        }
    }
    None
}

fn split_function_call(body: &str) -> Option<(&str, &str)> {
    let trimmed = body.trim_start();
    let offset = body.len() - trimmed.len();
    let ws = trimmed.find(|c: char| c.is_whitespace() || c == ',')?;
    let name = &trimmed[..ws];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return None;
    }
    let rest_start = offset + ws;
    let rest = &body[rest_start..];
    let rest = rest.strip_prefix(',').unwrap_or(rest);
    Some((name, rest))
}

/// Splits `rest` on top-level commas (honoring `$(...)`/`${...}` balance),
/// trimming a single leading space the way GNU Make's argument splitter
/// does.
fn split_top_level_commas(rest: &str) -> Vec<String> {
    if rest.is_empty() {
        return vec![];
    }
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' if chars.peek() == Some(&'(') || chars.peek() == Some(&'{') => {
                current.push(c);
            }
            '(' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    args.push(current);
    args
}

pub fn shell_env_from_store(store: &VariableStore, extra: &[(String, String)]) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = store.exported().map(|(k, v)| (k.to_string(), v)).collect();
    env.extend(extra.iter().cloned());
    env
}

pub fn default_shell_path() -> PathBuf {
    Path::new("/bin/sh").to_owned()
}
