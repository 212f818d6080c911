//! # Path Patterns
//!
//! Compiles route patterns such as `/users/:id`, `/users/{id}/posts` or
//! `/files/*path` into a segment list, and matches request paths against it.
//!
//! ## Syntax
//!
//! - `text` - static segment
//! - `:name` or `{name}` - named variable, binds one non-empty segment
//! - `*` or `*name` - wildcard, last segment only, binds the rest of the path
//!   (under the key `*` when unnamed)
//!
//! Captured values are percent-decoded. A wildcard decodes its whole tail, so
//! an encoded slash is indistinguishable from a real one: `/files/a%2Fb` and
//! `/files/a/b` both bind `a/b`. Read the raw path from the request when the
//! difference matters.
//!
//! Matching compares one segment position at a time. There is no regex and no
//! backtracking, so a pattern either matches in a single pass or it doesn't.

use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Capture key of an unnamed wildcard
pub const WILDCARD_KEY: &str = "*";

/// Path variables captured by a match, values percent-decoded
pub type PathVars = HashMap<String, String>;

/// One compiled pattern segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text (lower-cased when matching is case-insensitive)
    Static(String),
    /// Named variable
    Variable(String),
    /// Trailing wildcard with its capture key
    Wildcard(String),
}

/// How literal a pattern is
///
/// Ordered from most to least specific, so an ascending sort puts
/// static-only patterns first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Specificity {
    /// Only static segments
    Static,
    /// At least one variable, no wildcard
    Variable,
    /// Ends with a wildcard
    Wildcard,
}

/// Compiled, immutable route pattern
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
    trailing_slash: bool,
    case_sensitive: bool,
    ignore_trailing_slash: bool,
    specificity: Specificity,
}

/// Compile a route pattern
///
/// A missing leading slash is added; the empty pattern is `/`.
///
/// # Errors
///
/// Returns `Error::InvalidPattern` when a wildcard is not the last segment,
/// a variable name is empty, malformed or repeated, or braces don't span a
/// whole segment.
pub fn compile(pattern: &str, case_sensitive: bool, ignore_trailing_slash: bool) -> Result<RoutePattern> {
    let raw = if pattern.starts_with('/') {
        pattern.to_string()
    } else {
        format!("/{pattern}")
    };
    let trailing_slash = raw.len() > 1 && raw.ends_with('/');

    let tokens: Vec<&str> = raw.split('/').filter(|t| !t.is_empty()).collect();
    let mut segments = Vec::with_capacity(tokens.len());
    let mut names = HashSet::new();

    for (i, token) in tokens.iter().enumerate() {
        let segment =
            parse_segment(token, case_sensitive).map_err(|reason| invalid(&raw, reason))?;

        match &segment {
            Segment::Wildcard(_) if i + 1 != tokens.len() => {
                return Err(invalid(&raw, "wildcard must be the last segment".to_string()));
            }
            Segment::Variable(name) | Segment::Wildcard(name) => {
                if !names.insert(name.clone()) {
                    return Err(invalid(&raw, format!("duplicate variable '{name}'")));
                }
            }
            Segment::Static(_) => {}
        }
        segments.push(segment);
    }

    let specificity = if segments.iter().any(|s| matches!(s, Segment::Wildcard(_))) {
        Specificity::Wildcard
    } else if segments.iter().any(|s| matches!(s, Segment::Variable(_))) {
        Specificity::Variable
    } else {
        Specificity::Static
    };

    Ok(RoutePattern {
        raw,
        segments,
        trailing_slash,
        case_sensitive,
        ignore_trailing_slash,
        specificity,
    })
}

fn invalid(pattern: &str, reason: String) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    }
}

fn parse_segment(token: &str, case_sensitive: bool) -> std::result::Result<Segment, String> {
    if let Some(name) = token.strip_prefix(':') {
        return variable(name);
    }
    if let Some(inner) = token.strip_prefix('{') {
        let Some(name) = inner.strip_suffix('}') else {
            return Err(format!("unbalanced braces in '{token}'"));
        };
        if name.contains(':') {
            return Err(format!("variable constraints are not supported: '{token}'"));
        }
        return variable(name);
    }
    if token.contains('{') || token.contains('}') {
        return Err(format!("variables must span a whole segment: '{token}'"));
    }
    if let Some(name) = token.strip_prefix('*') {
        if name.is_empty() {
            return Ok(Segment::Wildcard(WILDCARD_KEY.to_string()));
        }
        return valid_name(name)
            .then(|| Segment::Wildcard(name.to_string()))
            .ok_or_else(|| format!("invalid wildcard name '{name}'"));
    }

    Ok(Segment::Static(if case_sensitive {
        token.to_string()
    } else {
        token.to_lowercase()
    }))
}

fn variable(name: &str) -> std::result::Result<Segment, String> {
    if name.is_empty() {
        return Err("empty variable name".to_string());
    }
    if !valid_name(name) {
        return Err(format!("invalid variable name '{name}'"));
    }
    Ok(Segment::Variable(name.to_string()))
}

fn valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Split one trailing slash off a path (the root path `/` keeps its slash)
fn split_trailing_slash(path: &str) -> (&str, bool) {
    if path.len() > 1 && path.ends_with('/') {
        (&path[..path.len() - 1], true)
    } else {
        (path, false)
    }
}

impl RoutePattern {
    /// Match a raw request path (no query string)
    ///
    /// Returns the captured variables on success.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PathVars> {
        let (body, trailing) = split_trailing_slash(path);
        let rest = body.strip_prefix('/').unwrap_or(body);
        let tokens: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        let mut vars = PathVars::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard(key) => {
                    let mut tail = tokens.get(i..).map(|t| t.join("/")).unwrap_or_default();
                    if trailing && !self.ignore_trailing_slash {
                        tail.push('/');
                    }
                    vars.insert(key.clone(), decode(&tail));
                    return Some(vars);
                }
                Segment::Static(text) => {
                    let decoded = decode(tokens.get(i)?);
                    let equal = if self.case_sensitive {
                        decoded == *text
                    } else {
                        decoded.to_lowercase() == *text
                    };
                    if !equal {
                        return None;
                    }
                }
                Segment::Variable(name) => {
                    let token = tokens.get(i)?;
                    if token.is_empty() {
                        return None;
                    }
                    vars.insert(name.clone(), decode(token));
                }
            }
        }

        if tokens.len() != self.segments.len() {
            return None;
        }
        if !self.ignore_trailing_slash && trailing != self.trailing_slash {
            return None;
        }
        Some(vars)
    }

    /// Pattern as registered (with leading slash)
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Compiled segments
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Variable names in pattern order, wildcard key included
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Variable(name) | Segment::Wildcard(name) => Some(name.as_str()),
                Segment::Static(_) => None,
            })
            .collect()
    }

    /// Specificity class used to order routes
    #[must_use]
    pub const fn specificity(&self) -> Specificity {
        self.specificity
    }

    /// Whether static segments compare case-sensitively
    #[must_use]
    pub const fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Whether `/foo` and `/foo/` are the same path for this pattern
    #[must_use]
    pub const fn ignores_trailing_slash(&self) -> bool {
        self.ignore_trailing_slash
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(pattern: &str) -> RoutePattern {
        compile(pattern, true, true).unwrap()
    }

    #[test]
    fn test_wildcard_decodes_encoded_slash() {
        let p = strict("/files/*");
        assert_eq!(p.matches("/files/a%2Fb").unwrap()[WILDCARD_KEY], "a/b");
        assert_eq!(p.matches("/files/a/b").unwrap()[WILDCARD_KEY], "a/b");
        assert_eq!(p.matches("/files/my%20doc.txt").unwrap()[WILDCARD_KEY], "my doc.txt");
    }

    #[test]
    fn test_segments() {
        let p = strict("/users/:id/posts/{post}");
        assert_eq!(
            p.segments(),
            &[
                Segment::Static("users".into()),
                Segment::Variable("id".into()),
                Segment::Static("posts".into()),
                Segment::Variable("post".into()),
            ]
        );
        assert_eq!(p.variables(), vec!["id", "post"]);
        assert_eq!(p.specificity(), Specificity::Variable);
    }

    #[test]
    fn test_variable_capture() {
        let p = strict("/a/:b/c");
        let vars = p.matches("/a/123/c").unwrap();
        assert_eq!(vars.get("b").map(String::as_str), Some("123"));
        assert_eq!(vars.len(), 1);

        assert!(p.matches("/a/123").is_none());
        assert!(p.matches("/a/123/c/d").is_none());
        assert!(p.matches("/a//c").is_none());
    }

    #[test]
    fn test_variables_are_decoded() {
        let p = strict("/users/:name");
        let vars = p.matches("/users/John%20Doe").unwrap();
        assert_eq!(vars["name"], "John Doe");

        let vars = p.matches("/users/a%2Fb").unwrap();
        assert_eq!(vars["name"], "a/b");
    }

    #[test]
    fn test_wildcard_captures_remainder() {
        let p = strict("/files/*");
        assert_eq!(p.specificity(), Specificity::Wildcard);
        let vars = p.matches("/files/x/y/z").unwrap();
        assert_eq!(vars[WILDCARD_KEY], "x/y/z");

        let vars = p.matches("/files").unwrap();
        assert_eq!(vars[WILDCARD_KEY], "");

        assert!(p.matches("/other/x").is_none());
    }

    #[test]
    fn test_named_wildcard() {
        let p = strict("/static/:version/*path");
        let vars = p.matches("/static/v2/css/site.css").unwrap();
        assert_eq!(vars["version"], "v2");
        assert_eq!(vars["path"], "css/site.css");
    }

    #[test]
    fn test_wildcard_must_be_last() {
        let err = compile("/files/*/meta", true, true).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_invalid_variables() {
        assert!(compile("/a/:", true, true).is_err());
        assert!(compile("/a/{}", true, true).is_err());
        assert!(compile("/a/{id", true, true).is_err());
        assert!(compile("/a/{id:[0-9]+}", true, true).is_err());
        assert!(compile("/a/file.{ext}", true, true).is_err());
        assert!(compile("/a/:id/b/:id", true, true).is_err());
    }

    #[test]
    fn test_case_insensitive() {
        let p = compile("/Foo", false, true).unwrap();
        assert!(p.matches("/foo").is_some());
        assert!(p.matches("/FOO").is_some());

        let p = strict("/Foo");
        assert!(p.matches("/Foo").is_some());
        assert!(p.matches("/foo").is_none());
    }

    #[test]
    fn test_case_insensitive_keeps_variable_case() {
        let p = compile("/Users/:name", false, true).unwrap();
        let vars = p.matches("/USERS/McKenzie").unwrap();
        assert_eq!(vars["name"], "McKenzie");
    }

    #[test]
    fn test_trailing_slash_ignored() {
        let p = compile("/foo", true, true).unwrap();
        assert!(p.matches("/foo").is_some());
        assert!(p.matches("/foo/").is_some());

        let p = compile("/foo/", true, true).unwrap();
        assert!(p.matches("/foo").is_some());
        assert!(p.matches("/foo/").is_some());
    }

    #[test]
    fn test_trailing_slash_strict() {
        let p = compile("/foo", true, false).unwrap();
        assert!(p.matches("/foo").is_some());
        assert!(p.matches("/foo/").is_none());

        let p = compile("/foo/", true, false).unwrap();
        assert!(p.matches("/foo/").is_some());
        assert!(p.matches("/foo").is_none());
    }

    #[test]
    fn test_root() {
        let p = strict("/");
        assert!(p.matches("/").is_some());
        assert!(p.matches("/a").is_none());

        let p = strict("");
        assert_eq!(p.raw(), "/");
        assert_eq!(p.specificity(), Specificity::Static);
    }

    #[test]
    fn test_missing_leading_slash() {
        let p = strict("users/:id");
        assert_eq!(p.raw(), "/users/:id");
        assert!(p.matches("/users/1").is_some());
    }

    #[test]
    fn test_specificity_order() {
        assert!(Specificity::Static < Specificity::Variable);
        assert!(Specificity::Variable < Specificity::Wildcard);
    }
}
