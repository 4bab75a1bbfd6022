//! Exclusion rules
//!
//! A rule is a dotted-name prefix matched on whole name components:
//! `Y.optional` matches `Y.optional` and `Y.optional.codec`, never
//! `Y.optional_extra`.
//!
//! A rule does not delete modules outright. It cuts the imports that would
//! pull a matched module in through its owner; a matched module another
//! retained module imports directly stays in the bundle.

use std::fmt;

use indexmap::IndexMap;

use crate::types::parent_module_name;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExclusionRule {
    prefix: String,
}

impl ExclusionRule {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, module_name: &str) -> bool {
        module_name
            .strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    }

    /// Whether this rule cuts an import of a matched module by `importer`
    ///
    /// A top-level rule has no owner and cuts every import, runtime hooks
    /// (`None`) included. A rule for `pkg.sub` cuts only the imports made by
    /// `pkg` itself.
    pub fn cuts_import_from(&self, importer: Option<&str>) -> bool {
        match parent_module_name(&self.prefix) {
            None => true,
            Some(owner) => importer == Some(owner),
        }
    }
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}

/// The manifest's rules plus how many modules each one matched
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    hits: IndexMap<ExclusionRule, usize>,
}

impl ExclusionSet {
    pub fn new(rules: impl IntoIterator<Item = ExclusionRule>) -> Self {
        Self {
            hits: rules.into_iter().map(|rule| (rule, 0)).collect(),
        }
    }

    /// First rule matching `module_name`, counting the hit
    pub fn check(&mut self, module_name: &str) -> Option<ExclusionRule> {
        let (rule, count) = self
            .hits
            .iter_mut()
            .find(|(rule, _)| rule.matches(module_name))?;
        *count += 1;
        Some(rule.clone())
    }

    /// Rules that never matched anything, in declaration order
    pub fn unmatched(&self) -> impl Iterator<Item = &ExclusionRule> {
        self.hits
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(rule, _)| rule)
    }
}
