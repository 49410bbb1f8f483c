//! Path pattern compilation and matching.
//!
//! Each `{name}` placeholder becomes a single-segment capture (`[^/]+`);
//! the whole pattern is anchored at both ends. Only captured *values* are
//! threaded to handlers, positionally, in pattern order.

use regex::Regex;

use super::RouterError;

#[derive(Debug, Clone)]
pub struct PathPattern {
    regex: Regex,
    params: Vec<String>,
    /// Number of non-placeholder segments; used for dispatch ordering
    /// (more literal segments = more specific).
    literals: usize,
}

impl PathPattern {
    pub fn compile(path: &str) -> Result<Self, RouterError> {
        let mut pattern = String::from("^");
        let mut params = Vec::new();
        let mut literal = String::new();

        let mut chars = path.chars();
        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }
            pattern.push_str(&regex::escape(&literal));
            literal.clear();

            let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            if name.is_empty() {
                return Err(RouterError::InvalidPattern {
                    path: path.to_string(),
                });
            }
            params.push(name);
            pattern.push_str("([^/]+)");
        }
        pattern.push_str(&regex::escape(&literal));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|_| RouterError::InvalidPattern {
            path: path.to_string(),
        })?;

        let literals = path
            .split('/')
            .filter(|s| !s.is_empty() && !s.starts_with('{'))
            .count();

        Ok(Self {
            regex,
            params,
            literals,
        })
    }

    /// Match `path`, returning captured values in pattern order.
    pub fn matches(&self, path: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(path)?;
        Some(
            caps.iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().to_string())
                .collect(),
        )
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn literals(&self) -> usize {
        self.literals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_placeholder_captures_one_segment() {
        let p = PathPattern::compile("/posts/{slug}").unwrap();
        assert_eq!(
            p.matches("/posts/hello-world"),
            Some(vec!["hello-world".to_string()])
        );
        // no slash inside a single placeholder
        assert_eq!(p.matches("/posts/hello/world"), None);
        assert_eq!(p.matches("/posts"), None);
    }

    #[test]
    fn anchored_both_ends() {
        let p = PathPattern::compile("/posts").unwrap();
        assert!(p.matches("/posts").is_some());
        assert!(p.matches("/posts/extra").is_none());
        assert!(p.matches("/x/posts").is_none());
    }

    #[test]
    fn multiple_placeholders_capture_in_order() {
        let p = PathPattern::compile("/themes/{theme}/assets/{path}").unwrap();
        assert_eq!(
            p.matches("/themes/dusk/assets/app.css"),
            Some(vec!["dusk".to_string(), "app.css".to_string()])
        );
        assert_eq!(p.params(), ["theme", "path"]);
    }

    #[test]
    fn literal_segments_are_escaped() {
        let p = PathPattern::compile("/api/v1.0/posts").unwrap();
        assert!(p.matches("/api/v1.0/posts").is_some());
        // '.' must not act as a regex wildcard
        assert!(p.matches("/api/v1x0/posts").is_none());
    }

    #[test]
    fn specificity_counts_literal_segments() {
        assert_eq!(PathPattern::compile("/posts/new").unwrap().literals(), 2);
        assert_eq!(PathPattern::compile("/posts/{slug}").unwrap().literals(), 1);
        assert_eq!(PathPattern::compile("/").unwrap().literals(), 0);
    }

    #[test]
    fn empty_placeholder_is_rejected() {
        assert!(PathPattern::compile("/posts/{}").is_err());
    }
}
