//! Name sanitizer: maps arbitrary file and folder names to dotted-identifier
//! safe keys.
//!
//! Rule precedence per segment is `leave > leave_insensitive > upper > lower >
//! default`. Rule tokens may be literal or carry `*`/`?` glob wildcards; the
//! `**tok**` form additionally requires the matched segment to sit strictly
//! inside the original string (characters on both sides).

use heck::ToUpperCamelCase;
use regex::Regex;
use serde::Deserialize;

/// Casing rules for API key generation, usually supplied via
/// `ApiOptions::api_name_rules` or the `[naming]` table of `lazytree.toml`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NameRules {
    /// Lowercase the first character of the first segment (camelCase keys).
    /// Off means PascalCase keys.
    pub lower_first: bool,
    /// Tokens kept exactly as written (case-sensitive match).
    pub leave: Vec<String>,
    /// Tokens kept as written, matched case-insensitively.
    pub leave_insensitive: Vec<String>,
    /// Tokens forced to UPPERCASE.
    pub upper: Vec<String>,
    /// Tokens forced to lowercase.
    pub lower: Vec<String>,
}

impl NameRules {
    pub fn camel() -> Self {
        NameRules {
            lower_first: true,
            ..NameRules::default()
        }
    }

    pub fn compile(&self) -> CompiledRules {
        CompiledRules {
            lower_first: self.lower_first,
            leave: compile_tokens(&self.leave, false),
            leave_insensitive: compile_tokens(&self.leave_insensitive, true),
            upper: compile_tokens(&self.upper, false),
            lower: compile_tokens(&self.lower, false),
        }
    }
}

/// A single compiled rule token.
#[derive(Clone)]
struct RuleToken {
    regex: Regex,
    /// `**tok**`: match only when the segment has neighbors in the original.
    interior_only: bool,
}

/// Rule lists compiled to anchored regexes, built once per rule set.
#[derive(Clone)]
pub struct CompiledRules {
    lower_first: bool,
    leave: Vec<RuleToken>,
    leave_insensitive: Vec<RuleToken>,
    upper: Vec<RuleToken>,
    lower: Vec<RuleToken>,
}

impl Default for CompiledRules {
    fn default() -> Self {
        NameRules::camel().compile()
    }
}

fn compile_tokens(tokens: &[String], insensitive: bool) -> Vec<RuleToken> {
    tokens
        .iter()
        .filter_map(|tok| {
            let (body, interior_only) = match tok.strip_prefix("**").and_then(|t| t.strip_suffix("**"))
            {
                Some(inner) if !inner.is_empty() => (inner, true),
                _ => (tok.as_str(), false),
            };
            let mut pattern = String::from("^");
            if insensitive {
                pattern = String::from("(?i)^");
            }
            for ch in body.chars() {
                match ch {
                    '*' => pattern.push_str(".*"),
                    '?' => pattern.push('.'),
                    _ => pattern.push_str(&regex::escape(&ch.to_string())),
                }
            }
            pattern.push('$');
            Regex::new(&pattern)
                .ok()
                .map(|regex| RuleToken { regex, interior_only })
        })
        .collect()
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_ident_start(c) => chars.all(is_ident_char),
        _ => false,
    }
}

/// A raw segment of the input together with its byte range in the original.
struct Segment<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn split_segments(raw: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = None;
    for (idx, ch) in raw.char_indices() {
        if is_ident_char(ch) {
            if start.is_none() {
                start = Some(idx);
            }
        } else if let Some(s) = start.take() {
            out.push(Segment {
                text: &raw[s..idx],
                start: s,
                end: idx,
            });
        }
    }
    if let Some(s) = start {
        out.push(Segment {
            text: &raw[s..],
            start: s,
            end: raw.len(),
        });
    }
    out
}

enum RuleHit {
    Leave,
    Upper,
    Lower,
    None,
}

fn match_rules(rules: &CompiledRules, seg: &Segment<'_>, original_len: usize) -> RuleHit {
    let interior = seg.start > 0 && seg.end < original_len;
    let applies = |tokens: &[RuleToken]| {
        tokens
            .iter()
            .any(|tok| (!tok.interior_only || interior) && tok.regex.is_match(seg.text))
    };
    if applies(&rules.leave) || applies(&rules.leave_insensitive) {
        RuleHit::Leave
    } else if applies(&rules.upper) {
        RuleHit::Upper
    } else if applies(&rules.lower) {
        RuleHit::Lower
    } else {
        RuleHit::None
    }
}

fn lower_first_char(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Sanitize one raw file/folder name into a dotted-identifier-safe key.
pub fn sanitize_key(raw: &str, rules: &CompiledRules) -> String {
    if is_valid_identifier(raw) {
        return raw.to_string();
    }

    let segments = split_segments(raw);
    let mut out = String::new();
    let mut emitted = 0usize;
    for seg in &segments {
        // Leading digits cannot start an identifier; drop them from the
        // first emitted segment.
        let text = if emitted == 0 {
            seg.text.trim_start_matches(|c: char| c.is_ascii_digit())
        } else {
            seg.text
        };
        if text.is_empty() {
            continue;
        }
        let piece = match match_rules(rules, seg, raw.len()) {
            RuleHit::Leave => text.to_string(),
            RuleHit::Upper => text.to_uppercase(),
            RuleHit::Lower => text.to_lowercase(),
            RuleHit::None => {
                if emitted == 0 {
                    if rules.lower_first {
                        lower_first_char(text)
                    } else {
                        text.to_upper_camel_case()
                    }
                } else {
                    text.to_upper_camel_case()
                }
            }
        };
        out.push_str(&piece);
        emitted += 1;
    }

    if out.is_empty() {
        return "_".to_string();
    }
    if !out.chars().next().map(is_ident_start).unwrap_or(false) {
        out.insert(0, '_');
    }
    out
}

/// One-shot convenience: compile `rules` and sanitize `raw`.
pub fn sanitize(raw: &str, rules: &NameRules) -> String {
    sanitize_key(raw, &rules.compile())
}
