//! Inner-entity selection filters.
//!
//! Every generation rule narrows its inner entity set through the same
//! four-step policy: include regex, exclude regex, dataset exclusion,
//! dataset inclusion — evaluated in that order for each candidate.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

/// A candidate that can be narrowed by a [`SelectionFilter`].
pub trait Selectable {
    /// The bare entity name the regex filters match against
    fn bare_name(&self) -> &str;

    /// Entity-kind-specific dataset membership; entities with no dataset
    /// semantics report non-membership
    fn in_dataset(&self, checked: &HashSet<String>) -> bool;
}

/// Include/exclude policy applied to a rule's inner entities.
#[derive(Debug, Default, Clone)]
pub struct SelectionFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
    include_dataset: HashSet<String>,
    exclude_dataset: HashSet<String>,
}

/// Compile a user pattern anchored to the whole name. The policy is a full
/// match, not a search.
fn compile_anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| Error::invalid_pattern(pattern, e))
}

impl SelectionFilter {
    /// Build a filter from optional regex patterns and dataset name sets.
    pub fn new(
        include: Option<&str>,
        exclude: Option<&str>,
        include_dataset: HashSet<String>,
        exclude_dataset: HashSet<String>,
    ) -> Result<Self> {
        Ok(Self {
            include: include.map(compile_anchored).transpose()?,
            exclude: exclude.map(compile_anchored).transpose()?,
            include_dataset,
            exclude_dataset,
        })
    }

    /// A filter that keeps everything.
    pub fn keep_all() -> Self {
        Self::default()
    }

    /// True when `candidate` survives all four filter steps.
    pub fn keeps<T: Selectable>(&self, candidate: &T) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(candidate.bare_name()) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(candidate.bare_name()) {
                return false;
            }
        }
        if !self.exclude_dataset.is_empty() && candidate.in_dataset(&self.exclude_dataset) {
            return false;
        }
        if !self.include_dataset.is_empty() && !candidate.in_dataset(&self.include_dataset) {
            return false;
        }
        true
    }

    /// Narrow a name-ordered candidate map to the surviving subset.
    pub fn apply<'a, T: Selectable>(
        &self,
        candidates: &'a BTreeMap<String, T>,
    ) -> BTreeMap<String, &'a T> {
        candidates
            .iter()
            .filter(|(_, candidate)| self.keeps(*candidate))
            .map(|(key, candidate)| (key.clone(), candidate))
            .collect()
    }
}
