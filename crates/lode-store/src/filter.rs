use ignore::overrides::{Override, OverrideBuilder};

use crate::error::{StoreError, StoreResult};

/// Glob filter applied to blob names in a listing.
///
/// Patterns follow gitignore line syntax: `*` stays within one path
/// segment, `**` spans segments, `{a,b}` alternates, and a pattern without
/// a `/` matches the final segment at any depth. No patterns means every
/// blob matches.
#[derive(Clone, Debug)]
pub struct BlobFilter {
    patterns: Vec<String>,
    matcher: Option<Override>,
}

impl BlobFilter {
    pub fn new<I, S>(patterns: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if patterns.is_empty() {
            return Ok(Self::all());
        }

        let mut builder = OverrideBuilder::new("");
        for pattern in &patterns {
            builder
                .add(pattern)
                .map_err(|e| StoreError::InvalidFilter(format!("{pattern}: {e}")))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| StoreError::InvalidFilter(e.to_string()))?;
        Ok(Self {
            patterns,
            matcher: Some(matcher),
        })
    }

    /// A filter that accepts every blob.
    pub fn all() -> Self {
        Self {
            patterns: Vec::new(),
            matcher: None,
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.matcher {
            None => true,
            Some(matcher) => matcher.matched(name, false).is_whitelist(),
        }
    }
}

impl Default for BlobFilter {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = BlobFilter::new(Vec::<String>::new()).unwrap();
        assert!(filter.matches("anything/at/all.bin"));
        assert!(BlobFilter::new(["", "  "]).unwrap().patterns().is_empty());
    }

    #[test]
    fn anchored_pattern_stays_in_directory() {
        let filter = BlobFilter::new(["logs/*.log"]).unwrap();
        assert!(filter.matches("logs/a.log"));
        assert!(!filter.matches("other/a.log"));
        assert!(!filter.matches("logs/a.txt"));
    }

    #[test]
    fn double_star_spans_directories() {
        let filter = BlobFilter::new(["**/*.json"]).unwrap();
        assert!(filter.matches("a/b/c.json"));
        assert!(filter.matches("c.json"));
        assert!(!filter.matches("a/b/c.log"));
    }

    #[test]
    fn any_pattern_may_match() {
        let filter = BlobFilter::new(["logs/*.log", "audit/**"]).unwrap();
        assert!(filter.matches("logs/x.log"));
        assert!(filter.matches("audit/2024/01/x.json"));
        assert!(!filter.matches("data/registry"));
    }

    #[test]
    fn alternation() {
        let filter = BlobFilter::new(["test{a,b}"]).unwrap();
        assert!(filter.matches("testa"));
        assert!(filter.matches("testb"));
        assert!(!filter.matches("testc"));
    }
}
