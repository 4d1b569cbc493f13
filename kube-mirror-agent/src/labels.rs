use std::collections::BTreeMap;

use crate::config::LabelConfig;

/// One configured label predicate.
#[derive(Debug, Clone)]
struct Rule {
    name: String,
    value: Option<String>,
}

impl Rule {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match labels.get(&self.name) {
            Some(actual) => self.value.as_deref().is_none_or(|want| want == actual),
            None => false,
        }
    }

    fn clause(&self) -> String {
        match &self.value {
            Some(value) => format!("{}={}", self.name, value),
            None => self.name.clone(),
        }
    }
}

/// Matches resource label maps against the configured bundles.
#[derive(Debug, Clone)]
pub struct Matcher {
    rules: Vec<Rule>,
}

impl Matcher {
    pub fn new(bundles: &[LabelConfig]) -> Self {
        let rules = bundles
            .iter()
            .map(|bundle| Rule {
                name: bundle.name.clone(),
                value: bundle.value.clone().filter(|v| !v.is_empty()),
            })
            .collect();
        Self { rules }
    }

    /// Indices of the bundles whose predicate holds, in configuration order.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Vec<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(labels))
            .map(|(index, _)| index)
            .collect()
    }

    /// Set-based selector over every bundle: `name[=value]` clauses joined
    /// by commas. Advisory; matching always re-checks locally.
    pub fn selector(&self) -> String {
        self.rules
            .iter()
            .map(Rule::clause)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Selector safe to push down to the API server. Only available when
    /// every bundle names the same label: a single bundle keeps its full
    /// clause, several bundles sharing the name reduce to existence.
    pub fn server_selector(&self) -> Option<String> {
        let first = self.rules.first()?;
        if self.rules.len() == 1 {
            return Some(first.clause());
        }
        if self.rules.iter().all(|rule| rule.name == first.name) {
            return Some(first.name.clone());
        }
        None
    }
}
