// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device hint parsing.
//!
//! A hint is free text such as `usrp addr=1.2.3.4,subdev=A:0`, `0` or
//! `rtl vid=0x0bda,pid=0x2838`. The leading token picks the backend through a
//! [`HintResolver`]; the rest becomes an ordered, type-inferred argument list.

use std::fmt;

/// How the leading token of a hint was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKind {
    /// Purely numeric leading token: device index, whitespace-separated args.
    Index,
    /// `key=value` leading token: addressed hardware, comma-separated args.
    Addressed,
    /// Leading token names the backend; the remainder carries the args.
    Named,
}

/// Classify the leading token of a hint.
pub fn classify(token: &str) -> HintKind {
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
        HintKind::Index
    } else if token.contains('=') {
        HintKind::Addressed
    } else {
        HintKind::Named
    }
}

/// Maps a hint to a backend identifier.
pub trait HintResolver: Send + Sync {
    fn resolve(&self, hint: &str) -> String;
}

/// Index hints go to `index_backend`, addressed hints to
/// `addressed_backend`, anything else is named by its upper-cased leading
/// token.
#[derive(Debug, Clone)]
pub struct DefaultHintResolver {
    pub index_backend: String,
    pub addressed_backend: String,
}

impl DefaultHintResolver {
    pub fn new(index_backend: impl Into<String>, addressed_backend: impl Into<String>) -> Self {
        Self {
            index_backend: index_backend.into(),
            addressed_backend: addressed_backend.into(),
        }
    }
}

impl Default for DefaultHintResolver {
    fn default() -> Self {
        Self::new("RTL", "USRP")
    }
}

impl HintResolver for DefaultHintResolver {
    fn resolve(&self, hint: &str) -> String {
        let leading = hint.split_whitespace().next().unwrap_or("");
        match classify(leading) {
            HintKind::Index => self.index_backend.clone(),
            HintKind::Addressed => self.addressed_backend.clone(),
            HintKind::Named => leading.to_ascii_uppercase(),
        }
    }
}

/// A single constructor argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(f64),
    /// Hex literal, kept verbatim (`0x0bda`).
    Hex(String),
    /// Quoted or bare string, without quotes.
    Str(String),
    /// Parenthesized/bracketed expression, kept verbatim.
    Expr(String),
}

impl ArgValue {
    /// Infer the type of a raw token value.
    pub fn classify(raw: &str) -> Self {
        let text = raw.trim();
        if let Some(inner) = unquote(text) {
            return ArgValue::Str(inner.to_string());
        }
        if (text.starts_with('(') && text.ends_with(')'))
            || (text.starts_with('[') && text.ends_with(']'))
        {
            return ArgValue::Expr(text.to_string());
        }
        if is_hex_literal(text) {
            return ArgValue::Hex(text.to_string());
        }
        if let Ok(value) = text.parse::<i64>() {
            return ArgValue::Int(value);
        }
        if text.chars().any(|c| c.is_ascii_digit()) {
            if let Ok(value) = text.parse::<f64>() {
                if value.is_finite() {
                    return ArgValue::Float(value);
                }
            }
        }
        ArgValue::Str(text.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::Float(v) => Some(*v),
            ArgValue::Hex(raw) => parse_hex(raw).map(|v| v as f64),
            ArgValue::Str(s) => s.trim().parse().ok(),
            ArgValue::Expr(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            ArgValue::Hex(raw) => parse_hex(raw).and_then(|v| i64::try_from(v).ok()),
            _ => None,
        }
    }

    /// Textual form without quotes.
    pub fn as_text(&self) -> String {
        match self {
            ArgValue::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "{}", v),
            // Debug keeps a fractional part so the value reparses as a float.
            ArgValue::Float(v) => write!(f, "{:?}", v),
            ArgValue::Hex(raw) | ArgValue::Expr(raw) => f.write_str(raw),
            ArgValue::Str(s) if s.contains('"') => write!(f, "'{}'", s),
            ArgValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// A constructor argument, optionally named (`key=value`).
#[derive(Debug, Clone, PartialEq)]
pub struct HintArg {
    pub key: Option<String>,
    pub value: ArgValue,
}

impl HintArg {
    pub fn parse(token: &str) -> Self {
        match split_key(token) {
            Some((key, value)) => HintArg {
                key: Some(key.to_string()),
                value: ArgValue::classify(value),
            },
            None => HintArg {
                key: None,
                value: ArgValue::classify(token),
            },
        }
    }
}

impl fmt::Display for HintArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}={}", key, self.value),
            None => self.value.fmt(f),
        }
    }
}

/// Ordered argument list handed to a backend constructor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HintArgs(pub Vec<HintArg>);

impl HintArgs {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HintArg> {
        self.0.iter()
    }

    /// Named argument lookup, case-insensitive.
    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0
            .iter()
            .find(|arg| {
                arg.key
                    .as_deref()
                    .map(|k| k.eq_ignore_ascii_case(key))
                    .unwrap_or(false)
            })
            .map(|arg| &arg.value)
    }

    /// The `idx`-th unnamed argument.
    pub fn positional(&self, idx: usize) -> Option<&ArgValue> {
        self.0
            .iter()
            .filter(|arg| arg.key.is_none())
            .nth(idx)
            .map(|arg| &arg.value)
    }

    /// Numeric named argument. Present but non-numeric values are an error.
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, String> {
        match self.get(key) {
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| format!("argument '{}' must be numeric, got {}", key, value)),
            None => Ok(None),
        }
    }

    pub fn get_text(&self, key: &str) -> Option<String> {
        self.get(key).map(ArgValue::as_text)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|value| match value {
            ArgValue::Int(v) => *v != 0,
            other => matches!(
                other.as_text().to_ascii_lowercase().as_str(),
                "true" | "yes" | "on"
            ),
        })
    }

    fn has_keys(&self) -> bool {
        self.0.iter().any(|arg| arg.key.is_some())
    }
}

impl fmt::Display for HintArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.has_keys() { "," } else { " " };
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(sep))
    }
}

/// A hint resolved to a backend id and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHint {
    pub backend: String,
    pub kind: HintKind,
    pub args: HintArgs,
}

impl ParsedHint {
    pub fn parse(text: &str, resolver: &dyn HintResolver) -> Result<Self, String> {
        let text = text.trim();
        let leading = text
            .split_whitespace()
            .next()
            .ok_or_else(|| "empty device hint".to_string())?;
        let kind = classify(leading);
        let backend = resolver.resolve(text);
        if backend.trim().is_empty() {
            return Err(format!("hint '{}' does not name a backend", text));
        }

        let (args_text, separator) = match kind {
            HintKind::Index => (text, Separator::Whitespace),
            HintKind::Addressed => (text, Separator::Comma),
            HintKind::Named => {
                let rest = text[leading.len()..].trim();
                let separator = if has_top_level_eq(rest) {
                    Separator::Comma
                } else {
                    Separator::Whitespace
                };
                (rest, separator)
            }
        };

        let args = tokenize(args_text, separator)
            .iter()
            .map(|token| HintArg::parse(token))
            .collect();

        Ok(Self {
            backend,
            kind,
            args: HintArgs(args),
        })
    }
}

impl fmt::Display for ParsedHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            HintKind::Index => {
                let parts: Vec<String> = self.args.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" "))
            }
            HintKind::Addressed => {
                let parts: Vec<String> = self.args.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
            HintKind::Named if self.args.is_empty() => f.write_str(&self.backend),
            HintKind::Named => write!(f, "{} {}", self.backend, self.args),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Whitespace,
    Comma,
}

impl Separator {
    fn joiner(self) -> &'static str {
        match self {
            Separator::Whitespace => " ",
            Separator::Comma => ",",
        }
    }
}

/// Split argument text, re-joining pieces that open a quote or parenthesis
/// and close it in a later piece.
pub fn tokenize(text: &str, separator: Separator) -> Vec<String> {
    let pieces: Vec<&str> = match separator {
        Separator::Whitespace => text.split_whitespace().collect(),
        Separator::Comma => text.split(',').collect(),
    };

    let mut tokens = Vec::new();
    let mut pending: Option<String> = None;
    for piece in pieces {
        let joined = match pending.take() {
            Some(mut head) => {
                head.push_str(separator.joiner());
                head.push_str(piece);
                head
            }
            None => piece.to_string(),
        };
        if is_balanced(&joined) {
            push_token(&mut tokens, &joined);
        } else {
            pending = Some(joined);
        }
    }
    // An unterminated tail is accepted as-is.
    if let Some(tail) = pending {
        push_token(&mut tokens, &tail);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, token: &str) {
    let token = token.trim();
    if !token.is_empty() {
        tokens.push(token.to_string());
    }
}

fn is_balanced(text: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut depth: i32 = 0;
    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                _ => {}
            },
        }
    }
    quote.is_none() && depth <= 0
}

/// Byte offset of the first `=` outside quotes and parentheses.
fn top_level_eq(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth: i32 = 0;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                '=' if depth <= 0 => return Some(idx),
                _ => {}
            },
        }
    }
    None
}

fn has_top_level_eq(text: &str) -> bool {
    top_level_eq(text).is_some()
}

fn split_key(token: &str) -> Option<(&str, &str)> {
    let idx = top_level_eq(token)?;
    let key = token[..idx].trim();
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Some((key, &token[idx + 1..]))
    } else {
        None
    }
}

fn unquote(text: &str) -> Option<&str> {
    for q in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            return Some(&text[1..text.len() - 1]);
        }
    }
    None
}

fn is_hex_literal(text: &str) -> bool {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"));
    matches!(digits, Some(d) if !d.is_empty() && d.chars().all(|c| c.is_ascii_hexdigit()))
}

fn parse_hex(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}
