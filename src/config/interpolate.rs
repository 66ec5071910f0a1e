//! Variable Interpolation
//!
//! Single-pass, left-to-right substitution of `${expr}` and `$name`
//! placeholders. Substituted text is never re-scanned, so a value that
//! itself contains `$` cannot trigger further expansion.

use std::collections::BTreeMap;

use super::error::ConfigError;

const PARAMS_PREFIX: &str = "params.";

/// Lookup table consulted by [`interpolate`]: the parameter namespace
/// first, then environment bindings such as `baseDir`.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    params: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl Bindings {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self {
            params: BTreeMap::new(),
            env,
        }
    }

    pub fn insert_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Resolves a placeholder expression.
    ///
    /// `params.x` only looks at the parameter namespace; a bare name tries
    /// parameters before environment bindings.
    pub fn lookup(&self, expr: &str) -> Option<&str> {
        if let Some(name) = expr.strip_prefix(PARAMS_PREFIX) {
            return self.params.get(name).map(String::as_str);
        }
        self.params
            .get(expr)
            .or_else(|| self.env.get(expr))
            .map(String::as_str)
    }
}

/// Substitutes every placeholder in `text`.
///
/// `key` names the option being resolved and is only used in errors.
/// A `$` that is not followed by `{` or an identifier is kept literally.
///
/// ```
/// use nexrunner::config::interpolate::{interpolate, Bindings};
///
/// let mut bindings = Bindings::default();
/// bindings.insert_param("outdir", "/x/results");
///
/// let path = interpolate("${params.outdir}/report.html", "report.file", &bindings).unwrap();
/// assert_eq!(path, "/x/results/report.html");
/// ```
pub fn interpolate(text: &str, key: &str, bindings: &Bindings) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];

        let (expr, consumed) = if let Some(braced) = after.strip_prefix('{') {
            let close = braced.find('}').ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("unterminated placeholder in '{}'", text),
            })?;
            (braced[..close].trim(), close + 2)
        } else {
            let name_len = identifier_len(after);
            if name_len == 0 {
                out.push('$');
                rest = after;
                continue;
            }
            (&after[..name_len], name_len)
        };

        let value = bindings
            .lookup(expr)
            .ok_or_else(|| ConfigError::UnresolvedReference {
                key: key.to_string(),
                reference: expr.to_string(),
            })?;
        out.push_str(value);
        rest = &after[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Length of the `$name` reference at the start of `text`.
///
/// `params.x` is read as one reference; any other dot ends the name so
/// that `$baseDir.txt`-style suffixes stay literal.
fn identifier_len(text: &str) -> usize {
    let word = word_len(text);
    if word == 0 {
        return 0;
    }

    if &text[..word] == "params" && text[word..].starts_with('.') {
        let member = word_len(&text[word + 1..]);
        if member > 0 {
            return word + 1 + member;
        }
    }
    word
}

fn word_len(text: &str) -> usize {
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return 0,
    }
    chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(index, _)| index)
        .unwrap_or(text.len())
}

/// Returns true if `text` contains something [`interpolate`] would expand.
pub fn has_placeholders(text: &str) -> bool {
    text.match_indices('$').any(|(index, _)| {
        let after = &text[index + 1..];
        after.starts_with('{') || identifier_len(after) > 0
    })
}
