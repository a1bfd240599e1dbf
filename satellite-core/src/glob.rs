//! URI glob compiler.
//!
//! Route patterns use `/` as a pattern-only separator, `*` to match any run
//! of non-`/` characters (one path segment), and `**` to match any run of
//! characters including `/` (multiple segments). Compiling is a one-time
//! translation into an anchored [`regex::Regex`], the same "compile once,
//! match per request" shape `router-core/src/app/gateway.rs` uses for its
//! `RedirectRule::pattern`.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct UriGlob {
    pattern: String,
    re: Regex,
}

impl UriGlob {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        Ok(UriGlob {
            pattern: pattern.to_string(),
            re: Regex::new(&format!("^{}$", translate(pattern)))?,
        })
    }

    pub fn matches(&self, uri: &str) -> bool {
        self.re.is_match(uri)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Translates a `*`/`**` glob into a regex body (no anchors).
fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '*' {
            if chars.get(i + 1) == Some(&'*') {
                out.push_str(".*");
                i += 2;
            } else {
                out.push_str("[^/]*");
                i += 1;
            }
        } else {
            if ".+()|[]{}^$\\".contains(c) {
                out.push('\\');
            }
            out.push(c);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_star_does_not_cross_segment() {
        let g = UriGlob::compile("/static/*").unwrap();
        assert!(g.matches("/static/app.js"));
        assert!(!g.matches("/static/js/app.js"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let g = UriGlob::compile("/static/**").unwrap();
        assert!(g.matches("/static/js/app.js"));
        assert!(g.matches("/static/"));
    }

    #[test]
    fn literal_segments_match_exactly() {
        let g = UriGlob::compile("/payload.bin").unwrap();
        assert!(g.matches("/payload.bin"));
        assert!(!g.matches("/payload.bin2"));
    }

    #[test]
    fn dots_in_pattern_are_literal() {
        let g = UriGlob::compile("/a.b").unwrap();
        assert!(g.matches("/a.b"));
        assert!(!g.matches("/axb"));
    }
}
