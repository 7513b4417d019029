//! Glob-style key patterns.
//!
//! `*` and `?` behave as in shells and `{a,b}` is an alternation. Nested braces are not
//! supported: a `{` inside an alternation is taken literally.

use regex::Regex;

use crate::error::{RepoError, RepoResult};

const WILDCARDS: [char; 3] = ['*', '?', '{'];

/// True when `key` contains a wildcard character.
#[must_use]
pub fn has_wildcard(key: &str) -> bool {
    key.contains(WILDCARDS)
}

/// Translate a wildcard pattern into a regular expression anchored at the end.
///
/// Callers add the leading `^` when matching whole keys.
#[must_use]
pub fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 1);
    let mut in_alternation = false;
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '{' if !in_alternation => {
                in_alternation = true;
                out.push('(');
            }
            '}' if in_alternation => {
                in_alternation = false;
                out.push(')');
            }
            ',' if in_alternation => out.push('|'),
            '(' | ')' | '$' | '[' | ']' | '^' | '.' | '|' | '\\' | '+' | '{' | '}' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('$');
    out
}

/// Prefix of `key` up to and including the last `/` before the first wildcard.
#[must_use]
pub fn wildcard_base(key: &str) -> &str {
    let first = key.find(WILDCARDS).unwrap_or(key.len());
    key[..first].rfind('/').map_or("", |slash| &key[..=slash])
}

/// Compiled matcher for full keys.
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    regex: Regex,
}

impl KeyMatcher {
    /// Compile `pattern` into a matcher anchored at both ends.
    ///
    /// # Errors
    ///
    /// Fails when the translated expression does not compile.
    pub fn new(pattern: &str) -> RepoResult<Self> {
        let expression = format!("^{}", translate(pattern));
        let regex = Regex::new(&expression).map_err(|source| RepoError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    /// True when `key` matches the whole pattern.
    #[must_use]
    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(pattern: &str) -> KeyMatcher {
        KeyMatcher::new(pattern).expect("pattern compiles")
    }

    #[test]
    fn star_matches_suffix_exactly() {
        let txt = matcher("*.txt");
        assert!(txt.is_match("a.txt"));
        assert!(!txt.is_match("a.txtx"));
        assert_eq!(translate("*.txt"), r".*\.txt$");
    }

    #[test]
    fn alternation_selects_listed_options() {
        let zip = matcher("file{a,b}.zip");
        assert!(zip.is_match("filea.zip"));
        assert!(zip.is_match("fileb.zip"));
        assert!(!zip.is_match("filec.zip"));
    }

    #[test]
    fn dot_is_literal() {
        let dotted = matcher("a.b");
        assert!(dotted.is_match("a.b"));
        assert!(!dotted.is_match("axb"));
    }

    #[test]
    fn question_mark_matches_one_character() {
        let single = matcher("log?.txt");
        assert!(single.is_match("log1.txt"));
        assert!(!single.is_match("log12.txt"));
    }

    #[test]
    fn commas_and_braces_outside_alternation_are_literal() {
        assert_eq!(translate("a,b}"), r"a,b\}$");
        let literal = matcher("a,b}");
        assert!(literal.is_match("a,b}"));
    }

    #[test]
    fn nested_open_brace_is_literal() {
        assert_eq!(translate("{a{b,c}"), r"(a\{b|c)$");
    }

    #[test]
    fn regex_metacharacters_are_escaped() {
        let meta = matcher("(x)+[y]^$|z\\");
        assert!(meta.is_match("(x)+[y]^$|z\\"));
    }

    #[test]
    fn base_is_prefix_before_first_wildcard() {
        assert_eq!(wildcard_base("a/b/*.txt"), "a/b/");
        assert_eq!(wildcard_base("a/b*/c.txt"), "a/");
        assert_eq!(wildcard_base("*.txt"), "");
        assert_eq!(wildcard_base("plain/key"), "plain/");
        assert!(has_wildcard("x/{a,b}"));
        assert!(!has_wildcard("x/a.b"));
    }
}
