//! The dotted path language and its glob patterns.
//!
//! Paths are ASCII-dot separated keys (`util.url.build`); no key may be
//! empty. Patterns extend paths with `*` (exactly one segment), `**` (zero or
//! more segments), `{a,b}` brace alternation (nesting bounded), and a leading
//! `!` for negation. A pattern compiles to an anchored regex executed against
//! the full path string.

use regex::Regex;

use crate::error::{Error, Result};

/// Maximum brace nesting depth; deeper patterns are rejected outright.
pub const MAX_BRACE_DEPTH: usize = 10;

/// Split a dotted path into segments, rejecting empty keys.
pub fn split_path(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Err(Error::Path(path.to_string()));
    }
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::Path(path.to_string()));
    }
    Ok(segments)
}

/// Join segments back into a dotted path.
pub fn join_path(segments: &[String]) -> String {
    segments.join(".")
}

/// A compiled path pattern; `matches` applies negation.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    negated: bool,
    alternatives: Vec<Regex>,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<PathPattern> {
        let (negated, body) = match pattern.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        if body.is_empty() {
            return Err(Error::Pattern {
                pattern: pattern.to_string(),
                message: "empty pattern".to_string(),
            });
        }
        let expanded = expand_braces(body, pattern)?;
        let alternatives = expanded
            .iter()
            .map(|alt| {
                let source = translate(alt);
                Regex::new(&source).map_err(|e| Error::Pattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PathPattern {
            raw: pattern.to_string(),
            negated,
            alternatives,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let hit = self.alternatives.iter().any(|re| re.is_match(path));
        hit != self.negated
    }
}

/// Expand `{a,b}` alternation into concrete patterns.
fn expand_braces(body: &str, original: &str) -> Result<Vec<String>> {
    let Some(open) = body.find('{') else {
        return Ok(vec![body.to_string()]);
    };

    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => {
                depth += 1;
                max_depth = max_depth.max(depth);
                if max_depth > MAX_BRACE_DEPTH {
                    return Err(Error::Pattern {
                        pattern: original.to_string(),
                        message: format!("brace nesting exceeds {MAX_BRACE_DEPTH}"),
                    });
                }
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            b',' if depth == 1 => splits.push(idx),
            _ => {}
        }
    }
    let Some(close) = close else {
        return Err(Error::Pattern {
            pattern: original.to_string(),
            message: "unbalanced '{'".to_string(),
        });
    };

    let prefix = &body[..open];
    let suffix = &body[close + 1..];
    let inner = &body[open + 1..close];

    let mut bounds = vec![open + 1];
    bounds.extend(splits.iter().map(|i| i + 1));
    let mut alts = Vec::new();
    for (i, start) in bounds.iter().enumerate() {
        let end = bounds.get(i + 1).map(|n| n - 1).unwrap_or(close);
        alts.push(&body[*start..end]);
    }
    if alts.is_empty() {
        alts.push(inner);
    }

    let mut out = Vec::new();
    for alt in alts {
        let candidate = format!("{prefix}{alt}{suffix}");
        out.extend(expand_braces(&candidate, original)?);
    }
    Ok(out)
}

/// Translate one brace-free pattern into an anchored regex source.
fn translate(pattern: &str) -> String {
    let mut re = String::from("^");
    let mut emitted = false;
    for seg in pattern.split('.') {
        if seg == "**" {
            if emitted {
                // zero or more further segments, each consuming its own dot
                re.push_str(r"(?:\.[^.]+)*");
            } else {
                // leading position: zero or more segments, each with a
                // trailing dot, so a following literal needs no separator
                re.push_str(r"(?:[^.]+\.)*");
            }
        } else {
            if emitted {
                re.push_str(r"\.");
            }
            re.push_str(&translate_segment(seg));
            emitted = true;
        }
    }
    if !emitted {
        // the pattern was pure "**": match any path
        re.push_str(r"[^.]*");
    }
    re.push('$');
    re
}

fn translate_segment(seg: &str) -> String {
    if seg == "*" {
        return r"[^.]+".to_string();
    }
    let mut out = String::new();
    for ch in seg.chars() {
        match ch {
            '*' => out.push_str(r"[^.]*"),
            '?' => out.push_str(r"[^.]"),
            _ => out.push_str(&regex::escape(&ch.to_string())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(p: &str) -> PathPattern {
        PathPattern::compile(p).expect("pattern compiles")
    }

    #[test]
    fn split_path_rejects_empty_keys() {
        assert!(split_path("a.b.c").is_ok());
        assert!(split_path("").is_err());
        assert!(split_path("a..b").is_err());
        assert!(split_path(".a").is_err());
        assert!(split_path("a.").is_err());
    }

    #[test]
    fn literal_patterns_match_exactly() {
        let p = pat("util.url.build");
        assert!(p.matches("util.url.build"));
        assert!(!p.matches("util.url"));
        assert!(!p.matches("util.url.build.extra"));
    }

    #[test]
    fn single_star_matches_one_segment() {
        let p = pat("math.*");
        assert!(p.matches("math.add"));
        assert!(!p.matches("math"));
        assert!(!p.matches("math.add.deep"));
        assert!(!p.matches("other.add"));
    }

    #[test]
    fn double_star_matches_zero_or_more() {
        let p = pat("api.**");
        assert!(p.matches("api"));
        assert!(p.matches("api.users"));
        assert!(p.matches("api.users.list"));

        let p = pat("**.save");
        assert!(p.matches("save"));
        assert!(p.matches("db.save"));
        assert!(p.matches("db.users.save"));

        let p = pat("a.**.b");
        assert!(p.matches("a.b"));
        assert!(p.matches("a.x.b"));
        assert!(p.matches("a.x.y.b"));
        assert!(!p.matches("a.x"));
    }

    #[test]
    fn pure_double_star_matches_everything() {
        let p = pat("**");
        assert!(p.matches("x"));
        assert!(p.matches("a.b.c"));
    }

    #[test]
    fn partial_segment_wildcards() {
        let p = pat("math.add*");
        assert!(p.matches("math.add"));
        assert!(p.matches("math.addAll"));
        assert!(!p.matches("math.sub"));

        let p = pat("v?.run");
        assert!(p.matches("v1.run"));
        assert!(p.matches("v2.run"));
        assert!(!p.matches("v10.run"));
    }

    #[test]
    fn brace_alternation_expands() {
        let p = pat("util.{url,path}.build");
        assert!(p.matches("util.url.build"));
        assert!(p.matches("util.path.build"));
        assert!(!p.matches("util.other.build"));
    }

    #[test]
    fn nested_braces_expand() {
        let p = pat("{a,b.{c,d}}.end");
        assert!(p.matches("a.end"));
        assert!(p.matches("b.c.end"));
        assert!(p.matches("b.d.end"));
        assert!(!p.matches("b.end"));
    }

    #[test]
    fn brace_overflow_is_fatal() {
        let mut deep = String::from("x");
        for _ in 0..(MAX_BRACE_DEPTH + 1) {
            deep = format!("{{{deep},y}}");
        }
        assert!(matches!(
            PathPattern::compile(&deep),
            Err(Error::Pattern { .. })
        ));
    }

    #[test]
    fn unbalanced_brace_is_fatal() {
        assert!(PathPattern::compile("a.{b,c").is_err());
    }

    #[test]
    fn negation_inverts() {
        let p = pat("!internal.**");
        assert!(!p.matches("internal.secret"));
        assert!(p.matches("public.api"));
    }
}
