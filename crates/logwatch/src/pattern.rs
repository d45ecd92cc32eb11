//! Log line patterns
//!
//! A pattern is an include regex plus an optional exclude regex; a line
//! matches when the include regex finds a match anywhere in it and the
//! exclude regex, if any, does not.

use std::fmt;

use regex::Regex;

use casprobe_core::{Error, Result};

/// Include/exclude pair applied to single log lines
#[derive(Debug, Clone)]
pub struct LogPattern {
    include: Regex,
    exclude: Option<Regex>,
}

impl LogPattern {
    /// Compile an include pattern.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPattern` if the regex does not compile.
    pub fn new(include: &str) -> Result<Self> {
        Ok(LogPattern {
            include: compile(include)?,
            exclude: None,
        })
    }

    /// Pattern matching `text` literally
    pub fn literal(text: &str) -> Result<Self> {
        Self::new(&regex::escape(text))
    }

    /// Suppress lines that also match `exclude`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPattern` if the regex does not compile.
    pub fn with_exclude(mut self, exclude: &str) -> Result<Self> {
        self.exclude = Some(compile(exclude)?);
        Ok(self)
    }

    /// Does `line` match?
    pub fn matches(&self, line: &str) -> bool {
        self.include.is_match(line) && !self.excluded(line)
    }

    /// Capture groups of the first include match (group 0 excluded), or
    /// `None` if the line does not match
    pub fn captures(&self, line: &str) -> Option<Vec<Option<String>>> {
        let caps = self.include.captures(line)?;
        if self.excluded(line) {
            return None;
        }
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect(),
        )
    }

    /// Include pattern source
    pub fn as_str(&self) -> &str {
        self.include.as_str()
    }

    fn excluded(&self, line: &str) -> bool {
        self.exclude.as_ref().is_some_and(|re| re.is_match(line))
    }
}

impl fmt::Display for LogPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exclude {
            Some(exclude) => write!(f, "/{}/ excluding /{}/", self.include, exclude),
            None => write!(f, "/{}/", self.include),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_is_unanchored() {
        let p = LogPattern::new("before handle_cdc").unwrap();
        assert!(p.matches("INFO  topology_state_load: before handle_cdc_generation"));
        assert!(!p.matches("after handle_cdc_generation"));
    }

    #[test]
    fn test_exclude_suppresses_match() {
        let p = LogPattern::new("ERROR")
            .unwrap()
            .with_exclude("expected failure")
            .unwrap();
        assert!(p.matches("ERROR disk full"));
        assert!(!p.matches("ERROR expected failure in test"));
        assert!(p.captures("ERROR expected failure in test").is_none());
    }

    #[test]
    fn test_captures_groups() {
        let p = LogPattern::new(r"node (\d+) (joined|left)( cleanly)?").unwrap();
        let groups = p.captures("node 3 joined").unwrap();
        assert_eq!(
            groups,
            vec![Some("3".to_string()), Some("joined".to_string()), None]
        );
    }

    #[test]
    fn test_literal_escapes() {
        let p = LogPattern::literal("handle_cdc_generation::wait (x)").unwrap();
        assert!(p.matches("hit handle_cdc_generation::wait (x) now"));
        assert!(!p.matches("handle_cdc_generation::wait x"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = LogPattern::new("(unclosed").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(_)));
        let err = LogPattern::new("ok").unwrap().with_exclude("[").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(_)));
    }

    #[test]
    fn test_display() {
        let p = LogPattern::new("a+").unwrap().with_exclude("b").unwrap();
        assert_eq!(p.to_string(), "/a+/ excluding /b/");
    }
}
