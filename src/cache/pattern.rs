//! Glob patterns for pattern invalidation.
//!
//! Supports the subset of Redis `MATCH` syntax that key invalidation needs:
//! `*` (any run), `?` (one character) and `\` escapes. Everything else is a
//! literal. The same pattern drives in-memory matching, Redis `SCAN MATCH`
//! and the durable tier's `LIKE` filter.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl KeyPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mut tokens = Vec::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '?' => tokens.push(Token::AnyOne),
                '\\' => match chars.next() {
                    Some(escaped) => tokens.push(Token::Literal(escaped)),
                    None => tokens.push(Token::Literal('\\')),
                },
                other => tokens.push(Token::Literal(other)),
            }
        }
        Self { raw, tokens }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Pattern source as Redis expects it for `SCAN ... MATCH`.
    ///
    /// `[` and `]` are escaped because this pattern treats them literally.
    pub fn to_redis_match(&self) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for token in &self.tokens {
            match token {
                Token::AnyRun => out.push('*'),
                Token::AnyOne => out.push('?'),
                Token::Literal(c) => {
                    if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                        out.push('\\');
                    }
                    out.push(*c);
                }
            }
        }
        out
    }

    /// SQL `LIKE` form using `\` as the escape character.
    pub fn to_sql_like(&self) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for token in &self.tokens {
            match token {
                Token::AnyRun => out.push('%'),
                Token::AnyOne => out.push('_'),
                Token::Literal(c) => {
                    if matches!(c, '%' | '_' | '\\') {
                        out.push('\\');
                    }
                    out.push(*c);
                }
            }
        }
        out
    }

    /// Literal prefix before the first wildcard.
    pub fn literal_prefix(&self) -> String {
        self.tokens
            .iter()
            .map_while(|token| match token {
                Token::Literal(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub fn matches(&self, key: &str) -> bool {
        let chars: Vec<char> = key.chars().collect();
        let (mut t, mut k) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;

        while k < chars.len() {
            match self.tokens.get(t) {
                Some(Token::AnyRun) => {
                    backtrack = Some((t, k));
                    t += 1;
                }
                Some(Token::AnyOne) => {
                    t += 1;
                    k += 1;
                }
                Some(Token::Literal(c)) if *c == chars[k] => {
                    t += 1;
                    k += 1;
                }
                _ => match backtrack {
                    Some((star_t, star_k)) => {
                        t = star_t + 1;
                        k = star_k + 1;
                        backtrack = Some((star_t, star_k + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens[t..].iter().all(|token| *token == Token::AnyRun)
    }
}

/// Escape `s` so it only ever matches itself, in both glob dialects.
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl From<&str> for KeyPattern {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_star_matches_category() {
        let pattern = KeyPattern::new("search:*");
        assert!(pattern.matches("search:ol:a1b2c3"));
        assert!(pattern.matches("search:"));
        assert!(!pattern.matches("isbn:ol:a1b2c3"));
        assert!(!pattern.matches("xsearch:ol:a1"));
    }

    #[test]
    fn inner_wildcards() {
        let pattern = KeyPattern::new("*:ol:*");
        assert!(pattern.matches("search:ol:abc"));
        assert!(pattern.matches("isbn:ol:"));
        assert!(!pattern.matches("isbn:gb:abc"));

        let one = KeyPattern::new("work:o?:*");
        assert!(one.matches("work:ol:1"));
        assert!(!one.matches("work:o:1"));
    }

    #[test]
    fn exact_pattern_requires_full_match() {
        let pattern = KeyPattern::new("isbn:ol:abc");
        assert!(pattern.matches("isbn:ol:abc"));
        assert!(!pattern.matches("isbn:ol:abcd"));
        assert!(!pattern.matches("isbn:ol:ab"));
    }

    #[test]
    fn escaped_wildcards_are_literal() {
        let pattern = KeyPattern::new(r"odd\*key");
        assert!(pattern.matches("odd*key"));
        assert!(!pattern.matches("oddXkey"));
    }

    #[test]
    fn sql_like_translation_escapes_metacharacters() {
        assert_eq!(KeyPattern::new("search:*").to_sql_like(), "search:%");
        assert_eq!(KeyPattern::new("a_b%?*").to_sql_like(), r"a\_b\%_%");
    }

    #[test]
    fn redis_match_escapes_brackets() {
        assert_eq!(KeyPattern::new("search:*").to_redis_match(), "search:*");
        assert_eq!(KeyPattern::new("a[b]*").to_redis_match(), r"a\[b\]*");
    }

    #[test]
    fn escaped_prefix_matches_only_itself() {
        let pattern = KeyPattern::new(format!("{}*", escape_glob("app*:")));
        assert!(pattern.matches("app*:search:ol:1"));
        assert!(!pattern.matches("appx:search:ol:1"));
    }

    #[test]
    fn literal_prefix_stops_at_first_wildcard() {
        assert_eq!(KeyPattern::new("search:ol:*").literal_prefix(), "search:ol:");
        assert_eq!(KeyPattern::new("*").literal_prefix(), "");
    }
}
