//! Decides whether a runtime-reported name is an instance of a statically
//! known parameterized template.

use regex::Regex;
use tracing::debug;

/// Kind of the candidate template node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TemplateKind {
    /// Groups may have arbitrary runtime suffixes.
    Group,
    /// Tests require an exact remaining match.
    Test,
}

/// Whether `runtime_name` is an instance of the template `candidate`.
///
/// The pattern is the candidate name escaped for literal use and anchored at
/// the start; group templates leave the end open. Interpolation placeholders
/// in the template (`$name` or `${name}`) match any runtime text, which is
/// how `"loop $i"` accepts `"loop 2"`.
pub(crate) fn matches_template(candidate: &str, runtime_name: &str, kind: TemplateKind) -> bool {
    if candidate.is_empty() {
        return false;
    }
    let body = template_pattern(candidate);
    let pattern = match kind {
        TemplateKind::Group => format!("^{body}"),
        TemplateKind::Test => format!("^{body}$"),
    };
    match Regex::new(&pattern) {
        Ok(regex) => regex.is_match(runtime_name),
        Err(err) => {
            debug!("unusable template pattern for '{candidate}': {err}");
            false
        }
    }
}

/// Escape `name` for literal matching, turning interpolation placeholders
/// into wildcards.
fn template_pattern(name: &str) -> String {
    let mut pattern = String::with_capacity(name.len() * 2);
    let mut literal_start = 0;
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            if let Some(end) = placeholder_end(name, i) {
                pattern.push_str(&regex::escape(&name[literal_start..i]));
                pattern.push_str(".*");
                i = end;
                literal_start = end;
                continue;
            }
        }
        i += 1;
    }
    pattern.push_str(&regex::escape(&name[literal_start..]));
    pattern
}

/// End offset of a `$name` / `${name}` placeholder starting at `start`, or
/// `None` when the `$` is just a literal dollar sign.
fn placeholder_end(name: &str, start: usize) -> Option<usize> {
    let rest = &name[start + 1..];
    if let Some(inner) = rest.strip_prefix('{') {
        let close = inner.find('}')?;
        if close == 0 || !inner[..close].chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
        return Some(start + 1 + 1 + close + 1);
    }
    let ident_len = rest
        .char_indices()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .map(|(idx, c)| idx + c.len_utf8())
        .last()?;
    Some(start + 1 + ident_len)
}
