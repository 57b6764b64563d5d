//! Named include/exclude filters applied by collectors to label values
//! such as device or filesystem names.

use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;

/// A single filter: an optional include pattern and an optional exclude
/// pattern. Exclude is checked first; an empty filter passes everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Filter {
    /// Values matching this pattern pass the filter.
    #[serde(default)]
    pub include: Option<String>,
    /// Values matching this pattern are rejected.
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(skip)]
    include_re: Option<Regex>,
    #[serde(skip)]
    exclude_re: Option<Regex>,
}

impl Filter {
    /// Create a filter from raw patterns. Patterns are compiled lazily by
    /// [`Filter::compile`].
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include: include.map(str::to_string),
            exclude: exclude.map(str::to_string),
            include_re: None,
            exclude_re: None,
        }
    }

    /// Compile the configured patterns.
    ///
    /// # Errors
    /// Returns the regex error of the first pattern that fails to compile.
    pub fn compile(&mut self) -> Result<(), regex::Error> {
        if let Some(ref pattern) = self.include {
            self.include_re = Some(Regex::new(pattern)?);
        }
        if let Some(ref pattern) = self.exclude {
            self.exclude_re = Some(Regex::new(pattern)?);
        }
        Ok(())
    }

    /// Check a value against the filter. Exclude wins over include.
    pub fn pass(&self, value: &str) -> bool {
        if let Some(ref re) = self.exclude_re {
            if re.is_match(value) {
                return false;
            }
        }
        if let Some(ref re) = self.include_re {
            return re.is_match(value);
        }
        true
    }
}

/// Collection of named filters, keyed by `<collector>/<label>`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, Filter>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add built-in filters for keys the user left unset.
    pub fn set_default(&mut self) {
        self.0
            .entry("netdev/device".to_string())
            .or_insert_with(|| Filter::new(None, Some("docker|virbr")));
    }

    /// Compile all filters.
    ///
    /// # Errors
    /// Returns the first compilation error encountered.
    pub fn compile(&mut self) -> Result<(), regex::Error> {
        for filter in self.0.values_mut() {
            filter.compile()?;
        }
        Ok(())
    }

    /// Look up a filter by key. Missing keys yield a pass-all filter.
    pub fn get(&self, key: &str) -> Filter {
        self.0.get(key).cloned().unwrap_or_default()
    }

    pub fn insert(&mut self, key: impl Into<String>, filter: Filter) {
        self.0.insert(key.into(), filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_passes_all() {
        let mut f = Filter::default();
        f.compile().unwrap();
        assert!(f.pass("eth0"));
        assert!(f.pass(""));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let mut f = Filter::new(Some("^eth"), Some("^eth1$"));
        f.compile().unwrap();
        assert!(f.pass("eth0"));
        assert!(!f.pass("eth1"));
        assert!(!f.pass("lo"));
    }

    #[test]
    fn test_include_only() {
        let mut f = Filter::new(Some("^(ext4|xfs)$"), None);
        f.compile().unwrap();
        assert!(f.pass("ext4"));
        assert!(!f.pass("tmpfs"));
    }

    #[test]
    fn test_invalid_pattern() {
        let mut f = Filter::new(Some("("), None);
        assert!(f.compile().is_err());
    }

    #[test]
    fn test_filters_default_netdev() {
        let mut filters = Filters::new();
        filters.set_default();
        filters.compile().unwrap();

        let f = filters.get("netdev/device");
        assert!(f.pass("eth0"));
        assert!(!f.pass("docker0"));
        assert!(!f.pass("virbr0"));
    }

    #[test]
    fn test_filters_user_value_kept() {
        let mut filters = Filters::new();
        filters.insert("netdev/device", Filter::new(None, Some("^lo$")));
        filters.set_default();
        filters.compile().unwrap();

        let f = filters.get("netdev/device");
        assert!(!f.pass("lo"));
        assert!(f.pass("docker0"));
    }

    #[test]
    fn test_filters_missing_key_passes() {
        let filters = Filters::new();
        assert!(filters.get("unknown/label").pass("anything"));
    }
}
