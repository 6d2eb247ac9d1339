//! Built-in functions: string/list, path, conditional/logic, meta, raw
//! control, I/O, and the shell bridge.

use std::path::Path;

use crate::error::ExpandError;
use crate::expand::Expander;
use crate::rule::Scope;
use crate::value::{Origin, VariableValue};

/// Function names that receive their arguments unexpanded (`foreach`,
/// `let`, `if`, `call`, `or`, `and` short-circuit so they are also raw).
const RAW_FUNCTIONS: &[&str] = &["foreach", "let", "if", "call", "or", "and"];

const KNOWN_FUNCTIONS: &[&str] = &[
    "subst", "patsubst", "strip", "findstring", "filter", "filter-out", "sort", "word", "words",
    "wordlist", "firstword", "lastword", "join", "addsuffix", "addprefix", "dir", "notdir",
    "suffix", "basename", "realpath", "abspath", "wildcard", "if", "or", "and", "intcmp",
    "value", "origin", "flavor", "foreach", "let", "call", "file", "error", "warning", "info",
    "shell", "eval",
];

pub fn is_known(name: &str) -> bool {
    KNOWN_FUNCTIONS.contains(&name)
}

pub fn is_raw(name: &str) -> bool {
    RAW_FUNCTIONS.contains(&name)
}

/// Dispatches a function call. `args` are pre-expanded unless `is_raw(name)`
/// is true, in which case they are the raw, unexpanded argument text.
pub fn call(
    name: &str,
    args: &[String],
    expander: &Expander<'_>,
    depth: usize,
) -> Result<String, ExpandError> {
    match name {
        "subst" => arity(name, args, 3).map(|a| subst(&a[0], &a[1], &a[2])),
        "patsubst" => arity(name, args, 3).map(|a| patsubst(&a[0], &a[1], &a[2])),
        "strip" => arity(name, args, 1).map(|a| a[0].split_whitespace().collect::<Vec<_>>().join(" ")),
        "findstring" => arity(name, args, 2)
            .map(|a| if a[1].contains(a[0].as_str()) { a[0].clone() } else { String::new() }),
        "filter" => arity(name, args, 2).map(|a| filter(&a[0], &a[1], true)),
        "filter-out" => arity(name, args, 2).map(|a| filter(&a[0], &a[1], false)),
        "sort" => arity(name, args, 1).map(|a| sort(&a[0])),
        "word" => arity(name, args, 2).map(|a| word(&a[0], &a[1])),
        "words" => arity(name, args, 1).map(|a| a[0].split_whitespace().count().to_string()),
        "wordlist" => arity(name, args, 3).map(|a| wordlist(&a[0], &a[1], &a[2])),
        "firstword" => arity(name, args, 1).map(|a| a[0].split_whitespace().next().unwrap_or("").to_string()),
        "lastword" => arity(name, args, 1).map(|a| a[0].split_whitespace().last().unwrap_or("").to_string()),
        "join" => arity(name, args, 2).map(|a| join(&a[0], &a[1])),
        "addsuffix" => arity(name, args, 2).map(|a| {
            a[1].split_whitespace()
                .map(|w| format!("{w}{}", a[0]))
                .collect::<Vec<_>>()
                .join(" ")
        }),
        "addprefix" => arity(name, args, 2).map(|a| {
            a[1].split_whitespace()
                .map(|w| format!("{}{w}", a[0]))
                .collect::<Vec<_>>()
                .join(" ")
        }),
        "dir" => arity(name, args, 1).map(|a| map_words(&a[0], dir_of)),
        "notdir" => arity(name, args, 1).map(|a| map_words(&a[0], notdir_of)),
        "suffix" => arity(name, args, 1).map(|a| {
            a[0].split_whitespace()
                .filter_map(suffix_of)
                .collect::<Vec<_>>()
                .join(" ")
        }),
        "basename" => arity(name, args, 1).map(|a| map_words(&a[0], basename_of)),
        "realpath" => arity(name, args, 1).map(|a| map_words_fallible(&a[0], |w| realpath_of(expander, w))),
        "abspath" => arity(name, args, 1).map(|a| map_words(&a[0], |w| abspath_of(expander, w))),
        "wildcard" => arity(name, args, 1).map(|a| wildcard(expander, &a[0])),
        "if" => call_if(args, expander, depth),
        "or" => call_or(args, expander, depth),
        "and" => call_and(args, expander, depth),
        "intcmp" => intcmp(args),
        "value" => arity(name, args, 1).map(|a| expander.raw(a[0].trim()).unwrap_or_default()),
        "origin" => arity(name, args, 1).map(|a| expander.origin(a[0].trim()).to_string()),
        "flavor" => arity(name, args, 1).map(|a| expander.flavor(a[0].trim()).to_string()),
        "foreach" => call_foreach(args, expander, depth),
        "let" => call_let(args, expander, depth),
        "call" => call_call(args, expander, depth),
        "file" => call_file(args, expander),
        "error" => Err(ExpandError::UserError(args.join(","))),
        "warning" => {
            expander.emit_warning(args.join(","));
            Ok(String::new())
        }
        "info" => {
            tracing::info!("{}", args.join(","));
            Ok(String::new())
        }
        "shell" => Ok(call_shell(expander, &args.join(","))),
        "eval" => {
            // The expander cannot re-enter the parser (no back-reference);
            // embedders that need eval() to install new rules should run the
            // parser over the result explicitly. Here we return the
            // expansion unchanged, matching the "eval feeds text back to the
            // parser" contract at the value level.
            Ok(args.join(","))
        }
        _ => Err(ExpandError::UnknownFunction(name.to_string())),
    }
}

fn arity(name: &str, args: &[String], min: usize) -> Result<Vec<String>, ExpandError> {
    if args.len() < min {
        return Err(ExpandError::Arity(name.to_string(), min, args.len()));
    }
    let mut v: Vec<String> = args.to_vec();
    while v.len() < min {
        v.push(String::new());
    }
    Ok(v)
}

fn subst(from: &str, to: &str, text: &str) -> String {
    if from.is_empty() {
        text.to_string()
    } else {
        text.replace(from, to)
    }
}

/// `%`-pattern substitution on a single word, used both by `patsubst` and by
/// substitution references (`name:pattern=replacement`).
pub fn patsubst_one(pattern: &str, replacement: &str, word: &str) -> String {
    let Some(pct) = pattern.find('%') else {
        return if word == pattern {
            replacement.to_string()
        } else {
            word.to_string()
        };
    };
    let (prefix, suffix) = (&pattern[..pct], &pattern[pct + 1..]);
    if let Some(rest) = word.strip_prefix(prefix)
        && let Some(stem) = rest.strip_suffix(suffix)
    {
        return replacement.replacen('%', stem, 1);
    }
    word.to_string()
}

fn patsubst(pattern: &str, replacement: &str, text: &str) -> String {
    text.split_whitespace()
        .map(|w| patsubst_one(pattern, replacement, w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn filter(patterns: &str, text: &str, keep_matches: bool) -> String {
    let pats: Vec<&str> = patterns.split_whitespace().collect();
    text.split_whitespace()
        .filter(|w| {
            let matched = pats.iter().any(|p| pattern_matches(p, w));
            matched == keep_matches
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn pattern_matches(pattern: &str, word: &str) -> bool {
    match pattern.find('%') {
        None => pattern == word,
        Some(pct) => {
            let (prefix, suffix) = (&pattern[..pct], &pattern[pct + 1..]);
            word.starts_with(prefix) && word.ends_with(suffix) && word.len() >= prefix.len() + suffix.len()
        }
    }
}

fn sort(text: &str) -> String {
    let mut words: Vec<&str> = text.split_whitespace().collect();
    words.sort_unstable();
    words.dedup();
    words.join(" ")
}

fn word(n: &str, text: &str) -> String {
    let Ok(idx) = n.trim().parse::<usize>() else {
        return String::new();
    };
    if idx == 0 {
        return String::new();
    }
    text.split_whitespace().nth(idx - 1).unwrap_or("").to_string()
}

fn wordlist(start: &str, end: &str, text: &str) -> String {
    let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>()) else {
        return String::new();
    };
    if start == 0 || end < start {
        return String::new();
    }
    text.split_whitespace()
        .skip(start - 1)
        .take(end - start + 1)
        .collect::<Vec<_>>()
        .join(" ")
}

fn join(lhs: &str, rhs: &str) -> String {
    let l: Vec<&str> = lhs.split_whitespace().collect();
    let r: Vec<&str> = rhs.split_whitespace().collect();
    let len = l.len().max(r.len());
    (0..len)
        .map(|i| format!("{}{}", l.get(i).copied().unwrap_or(""), r.get(i).copied().unwrap_or("")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn map_words(text: &str, f: impl Fn(&str) -> String) -> String {
    text.split_whitespace().map(|w| f(w)).collect::<Vec<_>>().join(" ")
}

fn map_words_fallible(text: &str, f: impl Fn(&str) -> Option<String>) -> String {
    text.split_whitespace()
        .filter_map(f)
        .collect::<Vec<_>>()
        .join(" ")
}

fn dir_of(word: &str) -> String {
    match word.rfind('/') {
        Some(idx) => word[..=idx].to_string(),
        None => "./".to_string(),
    }
}

fn notdir_of(word: &str) -> String {
    match word.rfind('/') {
        Some(idx) => word[idx + 1..].to_string(),
        None => word.to_string(),
    }
}

fn suffix_of(word: &str) -> Option<String> {
    let base = word.rsplit('/').next().unwrap_or(word);
    base.rfind('.').map(|idx| base[idx..].to_string())
}

fn basename_of(word: &str) -> String {
    let (dir, base) = match word.rfind('/') {
        Some(idx) => (&word[..=idx], &word[idx + 1..]),
        None => ("", word),
    };
    match base.rfind('.') {
        Some(idx) if idx > 0 => format!("{dir}{}", &base[..idx]),
        _ => word.to_string(),
    }
}

fn realpath_of(expander: &Expander<'_>, word: &str) -> Option<String> {
    expander
        .context()
        .fs
        .realpath(Path::new(word))
        .ok()
        .map(|p| p.display().to_string())
}

fn abspath_of(expander: &Expander<'_>, word: &str) -> String {
    let path = Path::new(word);
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        expander.context().cwd.join(path)
    };
    normalize_lexically(&abs)
}

fn normalize_lexically(path: &Path) -> String {
    use std::path::Component;
    let mut out: Vec<Component> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(comp);
                }
            }
            other => out.push(other),
        }
    }
    out.iter().collect::<std::path::PathBuf>().display().to_string()
}

fn wildcard(expander: &Expander<'_>, pattern: &str) -> String {
    let cwd = &expander.context().cwd;
    let mut matches: Vec<String> = Vec::new();
    for pat in pattern.split_whitespace() {
        let full_pattern = if Path::new(pat).is_absolute() {
            pat.to_string()
        } else {
            cwd.join(pat).display().to_string()
        };
        if let Ok(paths) = glob::glob(&full_pattern) {
            for entry in paths.flatten() {
                matches.push(entry.display().to_string());
            }
        }
    }
    matches.join(" ")
}

fn call_if(args: &[String], expander: &Expander<'_>, depth: usize) -> Result<String, ExpandError> {
    if args.is_empty() {
        return Err(ExpandError::Arity("if".to_string(), 1, 0));
    }
    let cond = expander.expand_public(&args[0], depth + 1);
    if !cond.trim().is_empty() {
        Ok(args.get(1).map(|t| expander.expand_public(t, depth + 1)).unwrap_or_default())
    } else {
        Ok(args.get(2).map(|t| expander.expand_public(t, depth + 1)).unwrap_or_default())
    }
}

fn call_or(args: &[String], expander: &Expander<'_>, depth: usize) -> Result<String, ExpandError> {
    for a in args {
        let v = expander.expand_public(a, depth + 1);
        if !v.trim().is_empty() {
            return Ok(v);
        }
    }
    Ok(String::new())
}

fn call_and(args: &[String], expander: &Expander<'_>, depth: usize) -> Result<String, ExpandError> {
    let mut last = String::new();
    for a in args {
        let v = expander.expand_public(a, depth + 1);
        if v.trim().is_empty() {
            return Ok(String::new());
        }
        last = v;
    }
    Ok(last)
}

fn intcmp(args: &[String]) -> Result<String, ExpandError> {
    let a = arity("intcmp", args, 4)?;
    let (Ok(lhs), Ok(rhs)) = (a[0].trim().parse::<i64>(), a[1].trim().parse::<i64>()) else {
        return Err(ExpandError::UserError(format!(
            "intcmp: non-numeric argument `{}` or `{}`",
            a[0], a[1]
        )));
    };
    Ok(match lhs.cmp(&rhs) {
        std::cmp::Ordering::Less => a[2].clone(),
        std::cmp::Ordering::Equal => a[3].clone(),
        std::cmp::Ordering::Greater => a.get(4).cloned().unwrap_or_else(|| a[3].clone()),
    })
}

fn call_foreach(args: &[String], expander: &Expander<'_>, depth: usize) -> Result<String, ExpandError> {
    let a = arity("foreach", args, 3)?;
    let var_name = expander.expand_public(&a[0], depth + 1);
    let var_name = var_name.trim();
    let words = expander.expand_public(&a[1], depth + 1);
    let mut results = Vec::new();
    for word in words.split_whitespace() {
        let mut scope = Scope::new();
        scope.insert(var_name.into(), VariableValue::simple(word, Origin::Automatic));
        let inner = expander.with(std::rc::Rc::new(scope));
        results.push(inner.expand_public(&a[2], depth + 1));
    }
    Ok(results.join(" "))
}

fn call_let(args: &[String], expander: &Expander<'_>, depth: usize) -> Result<String, ExpandError> {
    let a = arity("let", args, 3)?;
    let names_text = expander.expand_public(&a[0], depth + 1);
    let names: Vec<&str> = names_text.split_whitespace().collect();
    let values_text = expander.expand_public(&a[1], depth + 1);
    let values: Vec<&str> = values_text.split_whitespace().collect();

    let mut scope = Scope::new();
    for (i, name) in names.iter().enumerate() {
        let value = if i + 1 == names.len() {
            values.get(i..).map(|rest| rest.join(" ")).unwrap_or_default()
        } else {
            values.get(i).map(|s| s.to_string()).unwrap_or_default()
        };
        scope.insert((*name).into(), VariableValue::simple(value, Origin::Automatic));
    }
    let inner = expander.with(std::rc::Rc::new(scope));
    Ok(inner.expand_public(&a[2], depth + 1))
}

fn call_call(args: &[String], expander: &Expander<'_>, depth: usize) -> Result<String, ExpandError> {
    if args.is_empty() {
        return Err(ExpandError::Arity("call".to_string(), 1, 0));
    }
    let name = expander.expand_public(&args[0], depth + 1);
    let name = name.trim().to_string();
    let mut scope = Scope::new();
    scope.insert("0".into(), VariableValue::simple(name.clone(), Origin::Automatic));
    for (i, arg) in args.iter().skip(1).enumerate() {
        let value = expander.expand_public(arg, depth + 1);
        scope.insert((i + 1).to_string().into(), VariableValue::simple(value, Origin::Automatic));
    }
    let inner = expander.with(std::rc::Rc::new(scope));
    let body = inner.raw(&name).unwrap_or_default();
    Ok(inner.expand_public(&body, depth + 1))
}

fn call_file(args: &[String], expander: &Expander<'_>) -> Result<String, ExpandError> {
    if args.is_empty() {
        return Err(ExpandError::Arity("file".to_string(), 1, 0));
    }
    let spec = args[0].trim();
    let (op, filename) = spec
        .split_once(char::is_whitespace)
        .map(|(op, rest)| (op, rest.trim()))
        .ok_or_else(|| ExpandError::UserError("file: missing operation/filename".to_string()))?;
    let fs = expander.context().fs;
    let path = Path::new(filename);
    match op {
        ">" => {
            fs.write(path, false, args.get(1).map(String::as_str).unwrap_or(""))
                .map_err(|e| ExpandError::UserError(format!("file: {e}")))?;
            Ok(String::new())
        }
        ">>" => {
            fs.write(path, true, args.get(1).map(String::as_str).unwrap_or(""))
                .map_err(|e| ExpandError::UserError(format!("file: {e}")))?;
            Ok(String::new())
        }
        "<" => fs
            .read(path)
            .map_err(|e| ExpandError::UserError(format!("file: {e}"))),
        other => Err(ExpandError::UserError(format!("file: unknown operation `{other}`"))),
    }
}

fn call_shell(expander: &Expander<'_>, command_line: &str) -> String {
    let ctx = expander.context();
    let (output, code) =
        crate::world::run_shell_capture(ctx.shell, command_line, &ctx.shell_path, &ctx.cwd, &ctx.env);
    expander.store().record_shell_exit(code);
    output
}
