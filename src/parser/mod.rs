//! Line-oriented makefile scanner: continuations, comments, directives,
//! assignments and rule headers.

mod line;

use std::path::{Path, PathBuf};

use smol_str::SmolStr;

use crate::error::{Location, ParseError};
use crate::expand::{Expander, ExpandContext};
use crate::rule::{RuleEntry, Scope};
use crate::store::{AssignOp, VariableStore};
use crate::value::{Origin, VariableValue};
use crate::world::{IncludeLoader, VpathTable};

use line::{find_rule_colon, find_top_level, strip_comment};

/// Everything the parser accumulates that the engine needs beyond the
/// `VariableStore` it writes into directly: raw rule text, target/pattern
/// scopes, the suffix list (for old-style suffix rules), and bookkeeping
/// for deferred (`-include`/`sinclude`) includes.
pub struct Parser<'p> {
    store: &'p mut VariableStore,
    ctx: &'p ExpandContext<'p>,
    vpath: &'p mut VpathTable,
    loader: &'p dyn IncludeLoader,

    pub rules: Vec<RuleEntry>,
    pub scopes: Vec<(String, Scope)>,
    pub suffixes: Vec<String>,
    pub makefile_list: Vec<PathBuf>,
    pub deferred_includes: Vec<String>,

    recipe_prefix: char,
    current_file: Option<PathBuf>,
    last_rule: Option<usize>,
    expect_recipe: bool,
    cond_stack: Vec<CondFrame>,
}

struct CondFrame {
    self_taken: bool,
    any_taken: bool,
}

/// GNU Make's built-in `.SUFFIXES` list, installed before any makefile is
/// read so old-style suffix rules (`.c.o:`) resolve without an explicit
/// `.SUFFIXES` directive.
const DEFAULT_SUFFIXES: &[&str] = &[
    ".out", ".a", ".ln", ".o", ".c", ".cc", ".C", ".cpp", ".p", ".f", ".F", ".r", ".y", ".l", ".s",
    ".S", ".mod", ".sym", ".def", ".h", ".info", ".dvi", ".tex", ".texinfo", ".texi", ".txinfo",
    ".w", ".ch", ".web", ".sh", ".elc", ".el",
];

impl<'p> Parser<'p> {
    pub fn new(
        store: &'p mut VariableStore,
        ctx: &'p ExpandContext<'p>,
        vpath: &'p mut VpathTable,
        loader: &'p dyn IncludeLoader,
    ) -> Self {
        Self {
            store,
            ctx,
            vpath,
            loader,
            rules: Vec::new(),
            scopes: Vec::new(),
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            makefile_list: Vec::new(),
            deferred_includes: Vec::new(),
            recipe_prefix: '\t',
            current_file: None,
            last_rule: None,
            expect_recipe: false,
            cond_stack: Vec::new(),
        }
    }

    fn expander(&self) -> Expander<'_> {
        Expander::new(self.store, self.ctx)
    }

    fn expand(&self, text: &str) -> String {
        self.expander().expand(text)
    }

    fn overall_active(&self) -> bool {
        self.cond_stack.iter().all(|f| f.self_taken)
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<(), ParseError> {
        let contents = self
            .loader
            .read(path)
            .map_err(|e| ParseError::Io(Location::new(Some(path.to_owned()), 0), std::sync::Arc::new(e)))?;
        self.makefile_list.push(path.to_owned());
        let list = self
            .store
            .get(".MAKEFILE_LIST")
            .map(|v| format!("{v} {}", path.display()))
            .unwrap_or_else(|| path.display().to_string());
        self.store
            .set_raw(SmolStr::new("MAKEFILE_LIST"), VariableValue::simple(list, Origin::File));
        self.parse_str(Some(path.to_owned()), &contents)
    }

    pub fn parse_str(&mut self, file: Option<PathBuf>, text: &str) -> Result<(), ParseError> {
        let previous_file = self.current_file.take();
        self.current_file = file;
        let previous_last_rule = self.last_rule.take();
        self.expect_recipe = false;

        let result = self.parse_body(text);

        self.current_file = previous_file;
        self.last_rule = previous_last_rule;
        result
    }

    fn loc(&self, line: usize) -> Location {
        Location::new(self.current_file.clone(), line)
    }

    fn parse_body(&mut self, text: &str) -> Result<(), ParseError> {
        let phys: Vec<&str> = text.split('\n').collect();
        let mut i = 0usize;

        while i < phys.len() {
            let line_no = i + 1;
            let raw = phys[i].strip_suffix('\r').unwrap_or(phys[i]);
            i += 1;

            if raw.is_empty() {
                self.expect_recipe = false;
                continue;
            }

            if self.expect_recipe && starts_with_recipe_prefix(raw, self.recipe_prefix) {
                let prefix_len = self.recipe_prefix.len_utf8();
                let mut text = raw[prefix_len..].to_string();
                while text.ends_with('\\') && i < phys.len() {
                    text.push('\n');
                    text.push_str(phys[i].strip_suffix('\r').unwrap_or(phys[i]));
                    i += 1;
                }
                self.push_recipe_line(text, line_no)?;
                continue;
            }

            self.expect_recipe = false;

            // Join backslash continuations for non-recipe logical lines.
            let mut full = raw.to_string();
            while full.ends_with('\\') && i < phys.len() {
                full.pop();
                full.push(' ');
                let cont = phys[i].strip_suffix('\r').unwrap_or(phys[i]);
                full.push_str(cont.trim_start());
                i += 1;
            }

            // `define`/`endef` bodies are accumulated raw, bypassing
            // comment-stripping, so detect them before stripping.
            if let Some((overridden, private, rest)) = strip_override_private(full.trim_start()) {
                if let Some(after) = rest.strip_prefix("define") {
                    let is_boundary = after.is_empty() || after.starts_with(char::is_whitespace);
                    if is_boundary {
                        let header = after.trim_start();
                        i = self.parse_define(header, overridden, private, &phys, i, line_no)?;
                        continue;
                    }
                }
            }

            let line = strip_comment(&full);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            self.process_logical_line(line_no, trimmed)?;
        }

        if !self.cond_stack.is_empty() {
            return Err(ParseError::UnterminatedConditional(self.loc(phys.len())));
        }

        Ok(())
    }

    fn parse_define(
        &mut self,
        header: &str,
        overridden: bool,
        private: bool,
        phys: &[&str],
        mut i: usize,
        start_line: usize,
    ) -> Result<usize, ParseError> {
        let (name, op) = match header.split_once(char::is_whitespace) {
            Some((name, rest)) => (name.trim(), parse_bare_op(rest.trim()).unwrap_or(AssignOp::Recursive)),
            None => (header.trim(), AssignOp::Recursive),
        };

        let mut body_lines = Vec::new();
        loop {
            if i >= phys.len() {
                return Err(ParseError::UnterminatedDefine(self.loc(start_line)));
            }
            let raw = phys[i].strip_suffix('\r').unwrap_or(phys[i]);
            i += 1;
            if raw.trim() == "endef" {
                break;
            }
            body_lines.push(raw.to_string());
        }

        if !self.overall_active() {
            return Ok(i);
        }

        let body = body_lines.join("\n");
        self.assign(name, op, &body, overridden, private, start_line)?;
        Ok(i)
    }

    fn push_recipe_line(&mut self, text: String, line_no: usize) -> Result<(), ParseError> {
        let Some(idx) = self.last_rule else {
            return Err(ParseError::RecipeWithoutRule(self.loc(line_no)));
        };
        if self.overall_active() {
            self.rules[idx].recipe.push(text);
        }
        Ok(())
    }

    fn process_logical_line(&mut self, line_no: usize, trimmed: &str) -> Result<(), ParseError> {
        let (overridden, private, rest) = strip_override_private(trimmed).unwrap_or((false, false, trimmed));

        if let Some(word) = leading_word(rest)
            && is_directive_word(word)
        {
            return self.process_directive(line_no, word, rest[word.len()..].trim_start());
        }

        if !self.overall_active() {
            return Ok(());
        }

        if let Some((name, op, rhs)) = parse_assignment(trimmed) {
            return self.assign(name, op, rhs, false, false, line_no);
        }
        let _ = (overridden, private);

        self.process_rule_header(line_no, trimmed)
    }

    fn process_directive(&mut self, line_no: usize, word: &str, rest: &str) -> Result<(), ParseError> {
        match word {
            "ifeq" | "ifneq" | "ifdef" | "ifndef" => {
                let value = if self.overall_active() {
                    self.eval_conditional(word, rest, line_no)?
                } else {
                    false
                };
                let parent_active = self.overall_active();
                self.cond_stack.push(CondFrame {
                    self_taken: parent_active && value,
                    any_taken: parent_active && value,
                });
                Ok(())
            }
            "else" => {
                let rest = rest.trim_start();
                let frame = self
                    .cond_stack
                    .last_mut()
                    .ok_or_else(|| ParseError::Extraneous(self.loc(line_no), "else"))?;
                let parent_active = {
                    let len = self.cond_stack.len();
                    self.cond_stack[..len - 1].iter().all(|f| f.self_taken)
                };
                if let Some(word) = leading_word(rest)
                    && matches!(word, "ifeq" | "ifneq" | "ifdef" | "ifndef")
                {
                    let cond_rest = rest[word.len()..].trim_start();
                    let eligible = parent_active && !self.cond_stack.last().unwrap().any_taken;
                    let value = if eligible {
                        self.eval_conditional(word, cond_rest, line_no)?
                    } else {
                        false
                    };
                    let frame = self.cond_stack.last_mut().unwrap();
                    frame.self_taken = eligible && value;
                    frame.any_taken |= frame.self_taken;
                } else {
                    let frame = self.cond_stack.last_mut().unwrap();
                    let eligible = parent_active && !frame.any_taken;
                    frame.self_taken = eligible;
                    frame.any_taken |= eligible;
                }
                Ok(())
            }
            "endif" => {
                if self.cond_stack.pop().is_none() {
                    return Err(ParseError::Extraneous(self.loc(line_no), "endif"));
                }
                Ok(())
            }
            "endef" => Err(ParseError::Extraneous(self.loc(line_no), "endef")),
            "include" | "-include" | "sinclude" => {
                if !self.overall_active() {
                    return Ok(());
                }
                let expanded = self.expand(rest);
                for file in expanded.split_whitespace() {
                    let path = PathBuf::from(file);
                    match self.parse_file(&path) {
                        Ok(()) => {}
                        Err(e) if word == "include" => return Err(e),
                        Err(_) => self.deferred_includes.push(file.to_string()),
                    }
                }
                Ok(())
            }
            "export" => {
                if !self.overall_active() {
                    return Ok(());
                }
                self.process_export(rest, true, line_no)
            }
            "unexport" => {
                if !self.overall_active() {
                    return Ok(());
                }
                self.process_export(rest, false, line_no)
            }
            "undefine" => {
                if self.overall_active() {
                    let name = self.expand(rest.trim());
                    self.store.remove(name.trim());
                }
                Ok(())
            }
            "vpath" => {
                if self.overall_active() {
                    self.process_vpath(rest, line_no)?;
                }
                Ok(())
            }
            other => Err(ParseError::Unrecognized(self.loc(line_no), other.to_string())),
        }
    }

    fn process_export(&mut self, rest: &str, export: bool, line_no: usize) -> Result<(), ParseError> {
        let rest = rest.trim();
        if rest.is_empty() {
            if export {
                self.store.export_all = true;
            }
            return Ok(());
        }
        if let Some((name, op, rhs)) = parse_assignment(rest) {
            self.assign(name, op, rhs, false, false, line_no)?;
            self.store.set_export(name.trim(), export);
            return Ok(());
        }
        let names = self.expand(rest);
        for name in names.split_whitespace() {
            self.store.set_export(name, export);
        }
        Ok(())
    }

    fn process_vpath(&mut self, rest: &str, line_no: usize) -> Result<(), ParseError> {
        let expanded = self.expand(rest);
        let mut words = expanded.split_whitespace();
        match words.next() {
            None => {
                self.vpath.clear();
                Ok(())
            }
            Some(pattern) => {
                let dirs: Vec<String> = words.map(str::to_string).collect();
                if dirs.is_empty() {
                    self.vpath.remove_pattern(pattern);
                } else {
                    self.vpath.insert(pattern, dirs);
                }
                let _ = line_no;
                Ok(())
            }
        }
    }

    fn eval_conditional(&self, word: &str, rest: &str, line_no: usize) -> Result<bool, ParseError> {
        match word {
            "ifdef" | "ifndef" => {
                let name = self.expand(rest.trim());
                let defined = self.expander().raw(name.trim()).is_some();
                Ok(if word == "ifdef" { defined } else { !defined })
            }
            "ifeq" | "ifneq" => {
                let (lhs, rhs) = split_two_args(rest.trim())
                    .ok_or_else(|| ParseError::InvalidRule(self.loc(line_no), rest.to_string()))?;
                let lhs = self.expand(&lhs);
                let rhs = self.expand(&rhs);
                Ok(if word == "ifeq" { lhs == rhs } else { lhs != rhs })
            }
            _ => unreachable!(),
        }
    }

    fn assign(
        &mut self,
        name: &str,
        op: AssignOp,
        rhs: &str,
        overridden: bool,
        private: bool,
        line_no: usize,
    ) -> Result<(), ParseError> {
        if !self.overall_active() {
            return Ok(());
        }
        let origin = if overridden { Origin::Override } else { Origin::File };
        if overridden {
            self.store.relabel_environment_override(name.trim());
        }
        // Expansion needs only `&VariableStore`; compute it before the
        // `&mut self.store` call below so the two borrows never overlap.
        let expanded_rhs = match op {
            AssignOp::Simple | AssignOp::ImmediateEscaped => Expander::new(self.store, self.ctx).expand(rhs),
            AssignOp::Append => Expander::new(self.store, self.ctx).expand(rhs),
            _ => String::new(),
        };
        self.store.set(
            name.trim(),
            op,
            rhs,
            &expanded_rhs,
            origin,
            self.ctx.shell,
            &self.ctx.shell_path,
            &self.ctx.cwd,
            &self.ctx.env,
        );
        if private {
            self.store.set_private(name.trim(), true);
        }
        let _ = line_no;
        Ok(())
    }

    fn process_rule_header(&mut self, line_no: usize, trimmed: &str) -> Result<(), ParseError> {
        let Some((start, run_len)) = find_rule_colon(trimmed) else {
            return Err(ParseError::Unrecognized(self.loc(line_no), trimmed.to_string()));
        };

        let mut targets_text = trimmed[..start].trim_end();
        let grouped = targets_text.ends_with('&');
        if grouped {
            targets_text = targets_text[..targets_text.len() - 1].trim_end();
        }
        let double_colon = run_len >= 2;
        let rest = trimmed[start + run_len..].trim_start();

        if targets_text.trim() == ".SUFFIXES" {
            let expanded = self.expand(rest);
            if expanded.trim().is_empty() {
                self.suffixes.clear();
            } else {
                self.suffixes
                    .extend(expanded.split_whitespace().map(str::to_string));
            }
            return Ok(());
        }

        let (scope_private, scope_rhs_source) = match strip_override_private(rest) {
            Some((_, private, inner)) => (private, inner),
            None => (false, rest),
        };
        if let Some((name, op, rhs)) = parse_assignment(scope_rhs_source) {
            let mut scope = Scope::new();
            let expand_now = |s: &str| self.expand(s);
            let value = match op {
                AssignOp::Simple | AssignOp::ImmediateEscaped => expand_now(rhs),
                AssignOp::Conditional | AssignOp::Recursive | AssignOp::Append => rhs.to_string(),
                AssignOp::Shell => rhs.to_string(),
            };
            let recursive = !matches!(op, AssignOp::Simple | AssignOp::ImmediateEscaped);
            let mut v = VariableValue::new(value, Origin::File, recursive);
            v.private = scope_private;
            scope.insert(name.trim().into(), v);
            self.scopes.push((targets_text.to_string(), scope));
            self.last_rule = None;
            self.expect_recipe = false;
            return Ok(());
        }

        let (prereq_part, inline_recipe) = match find_top_level(rest, ';') {
            Some(idx) => (rest[..idx].trim(), Some(rest[idx + 1..].to_string())),
            None => (rest.trim(), None),
        };
        let (normal, order_only) = match find_top_level(prereq_part, '|') {
            Some(idx) => (prereq_part[..idx].trim(), prereq_part[idx + 1..].trim()),
            None => (prereq_part, ""),
        };

        if normal.is_empty() && order_only.is_empty() && !targets_text.contains(char::is_whitespace) {
            if let Some((pattern_target, pattern_prereq)) = suffix_rule_pattern(targets_text, &self.suffixes) {
                let mut entry = RuleEntry::new(&pattern_target, &pattern_prereq, self.loc(line_no));
                entry.double_colon = double_colon;
                entry.grouped = grouped;
                if let Some(recipe) = inline_recipe {
                    entry.recipe.push(recipe);
                }
                self.rules.push(entry);
                self.last_rule = Some(self.rules.len() - 1);
                self.expect_recipe = true;
                return Ok(());
            }
        }

        let mut entry = RuleEntry::new(targets_text, normal, self.loc(line_no));
        entry.double_colon = double_colon;
        entry.grouped = grouped;
        if !order_only.is_empty() {
            entry.prerequisites = format!("{normal} | {order_only}");
        }
        if let Some(recipe) = inline_recipe {
            entry.recipe.push(recipe);
        }

        self.rules.push(entry);
        self.last_rule = Some(self.rules.len() - 1);
        self.expect_recipe = true;
        Ok(())
    }
}

/// Rewrites an old-style suffix-rule target (`.c.o`, `.o`) into the
/// `(target, prerequisite)` pattern pair it stands for, per the classic
/// `.SUFFIXES`-driven transformation: `.c.o` becomes `%.o : %.c`, and a
/// lone `.o` becomes `% : %.o`. Returns `None` if `target` doesn't start
/// with `.` or doesn't decompose into one or two suffixes from `known`.
fn suffix_rule_pattern(target: &str, known: &[String]) -> Option<(String, String)> {
    if !target.starts_with('.') || target.len() < 2 {
        return None;
    }
    for i in 1..target.len() {
        if !target.is_char_boundary(i) {
            continue;
        }
        let (from, to) = target.split_at(i);
        if known.iter().any(|s| s == from) && known.iter().any(|s| s == to) {
            return Some((format!("%{to}"), format!("%{from}")));
        }
    }
    if known.iter().any(|s| s == target) {
        return Some(("%".to_string(), format!("%{target}")));
    }
    None
}

fn starts_with_recipe_prefix(line: &str, prefix: char) -> bool {
    line.starts_with(prefix)
}

fn leading_word(s: &str) -> Option<&str> {
    let end = s.find(|c: char| c.is_whitespace()).unwrap_or(s.len());
    if end == 0 { None } else { Some(&s[..end]) }
}

fn is_directive_word(word: &str) -> bool {
    matches!(
        word,
        "ifeq"
            | "ifneq"
            | "ifdef"
            | "ifndef"
            | "else"
            | "endif"
            | "endef"
            | "include"
            | "-include"
            | "sinclude"
            | "export"
            | "unexport"
            | "undefine"
            | "vpath"
    )
}

fn strip_override_private(s: &str) -> Option<(bool, bool, &str)> {
    let mut rest = s;
    let mut overridden = false;
    let mut private = false;
    loop {
        if let Some(r) = rest.strip_prefix("override") {
            if r.is_empty() || r.starts_with(char::is_whitespace) {
                overridden = true;
                rest = r.trim_start();
                continue;
            }
        }
        if let Some(r) = rest.strip_prefix("private") {
            if r.is_empty() || r.starts_with(char::is_whitespace) {
                private = true;
                rest = r.trim_start();
                continue;
            }
        }
        break;
    }
    if overridden || private {
        Some((overridden, private, rest))
    } else {
        None
    }
}

/// Scans for the first top-level `=` and classifies the 0-3 characters
/// preceding it as one of the six operators, per §4.D's assignment regex.
fn parse_assignment(line: &str) -> Option<(&str, AssignOp, &str)> {
    let bytes = line.as_bytes();
    let mut depth = 0i32;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'{' => depth += 1,
            b')' | b'}' => depth -= 1,
            b'=' if depth == 0 => {
                let (op, op_start) = classify_operator(&line[..i]);
                let name = line[..op_start].trim();
                if name.is_empty() || !is_plausible_name(name) {
                    return None;
                }
                let rhs = line[i + 1..].trim_start();
                return Some((name, op, rhs));
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parses a bare operator token (no surrounding name/rhs), as seen after
/// `define NAME <op>`.
fn parse_bare_op(s: &str) -> Option<AssignOp> {
    Some(match s {
        "=" => AssignOp::Recursive,
        ":=" | "::=" => AssignOp::Simple,
        ":::=" => AssignOp::ImmediateEscaped,
        "?=" => AssignOp::Conditional,
        "+=" => AssignOp::Append,
        "!=" => AssignOp::Shell,
        _ => return None,
    })
}

fn classify_operator(prefix: &str) -> (AssignOp, usize) {
    if let Some(p) = prefix.strip_suffix(":::") {
        return (AssignOp::ImmediateEscaped, p.len());
    }
    if let Some(p) = prefix.strip_suffix("::") {
        return (AssignOp::Simple, p.len());
    }
    if let Some(p) = prefix.strip_suffix(':') {
        return (AssignOp::Simple, p.len());
    }
    if let Some(p) = prefix.strip_suffix('+') {
        return (AssignOp::Append, p.len());
    }
    if let Some(p) = prefix.strip_suffix('?') {
        return (AssignOp::Conditional, p.len());
    }
    if let Some(p) = prefix.strip_suffix('!') {
        return (AssignOp::Shell, p.len());
    }
    (AssignOp::Recursive, prefix.len())
}

fn is_plausible_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(char::is_whitespace) && !name.contains(':') && !name.contains(';')
}

fn split_two_args(rest: &str) -> Option<(String, String)> {
    if let Some(inner) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        let idx = find_top_level(inner, ',')?;
        return Some((inner[..idx].to_string(), inner[idx + 1..].to_string()));
    }
    // quoted form: "a" "b"
    let mut parts = Vec::new();
    let mut chars = rest.trim().chars().peekable();
    for _ in 0..2 {
        let quote = *chars.peek()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        chars.next();
        let mut s = String::new();
        for c in chars.by_ref() {
            if c == quote {
                break;
            }
            s.push(c);
        }
        parts.push(s);
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
    }
    if parts.len() == 2 {
        Some((parts[0].clone(), parts[1].clone()))
    } else {
        None
    }
}
