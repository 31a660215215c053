//! Event routing - event name -> distributor names

use regex::Regex;
use std::collections::BTreeMap;

use crate::ContractError;

/// One routing-table key.
///
/// Keys containing `*` (any run of characters) or `?` (one character) are
/// patterns; everything else is an exact event name.
#[derive(Debug, Clone)]
pub enum RoutePattern {
    Exact(String),
    Wildcard {
        raw: String,
        regex: Regex,
        wildcards: usize,
    },
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Result<Self, ContractError> {
        if raw.is_empty() {
            return Err(ContractError::config_validation(
                "event_routing",
                "route key cannot be empty",
            ));
        }
        if !raw.contains(['*', '?']) {
            return Ok(Self::Exact(raw.to_string()));
        }

        let mut expr = String::with_capacity(raw.len() + 8);
        expr.push('^');
        let mut literal = String::new();
        let mut wildcards = 0;
        for c in raw.chars() {
            match c {
                '*' | '?' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    expr.push_str(if c == '*' { ".*" } else { "." });
                    wildcards += 1;
                }
                other => literal.push(other),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| {
            ContractError::config_validation(
                format!("event_routing[{raw}]"),
                format!("invalid route pattern: {e}"),
            )
        })?;
        Ok(Self::Wildcard {
            raw: raw.to_string(),
            regex,
            wildcards,
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(s) => s,
            Self::Wildcard { raw, .. } => raw,
        }
    }

    pub fn matches(&self, event: &str) -> bool {
        match self {
            Self::Exact(s) => s == event,
            Self::Wildcard { regex, .. } => regex.is_match(event),
        }
    }
}

/// Compiled routing table.
///
/// Resolution order: an exact key wins; otherwise the most specific
/// matching pattern (fewest wildcards, then longest key, then lexical
/// order) wins. Only one route applies per event.
#[derive(Debug, Clone, Default)]
pub struct EventRouter {
    exact: BTreeMap<String, Vec<String>>,
    patterns: Vec<(RoutePattern, Vec<String>)>,
}

impl EventRouter {
    pub fn new(table: &BTreeMap<String, Vec<String>>) -> Result<Self, ContractError> {
        let mut router = Self::default();
        for (key, distributors) in table {
            match RoutePattern::parse(key)? {
                RoutePattern::Exact(name) => {
                    router.exact.insert(name, distributors.clone());
                }
                pattern => router.patterns.push((pattern, distributors.clone())),
            }
        }
        router.patterns.sort_by(|(a, _), (b, _)| {
            specificity(a)
                .cmp(&specificity(b))
                .then_with(|| a.as_str().cmp(b.as_str()))
        });
        Ok(router)
    }

    /// No routes at all
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }

    /// Distributors for `event`; `None` when no route matches
    pub fn resolve(&self, event: &str) -> Option<&[String]> {
        if let Some(targets) = self.exact.get(event) {
            return Some(targets);
        }
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.matches(event))
            .map(|(_, targets)| targets.as_slice())
    }

    /// Every distributor name referenced anywhere in the table
    pub fn referenced(&self) -> impl Iterator<Item = &str> {
        self.exact
            .values()
            .chain(self.patterns.iter().map(|(_, t)| t))
            .flat_map(|targets| targets.iter().map(String::as_str))
    }
}

// Lower sorts first: fewer wildcards, then longer keys.
fn specificity(pattern: &RoutePattern) -> (usize, std::cmp::Reverse<usize>) {
    match pattern {
        RoutePattern::Exact(s) => (0, std::cmp::Reverse(s.len())),
        RoutePattern::Wildcard { raw, wildcards, .. } => {
            (*wildcards, std::cmp::Reverse(raw.len()))
        }
    }
}
