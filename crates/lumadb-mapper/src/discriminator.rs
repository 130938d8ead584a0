//! Discriminator matching
//!
//! Decides whether a physical item belongs to a logical entity kind. Several
//! kinds can share one table; the discriminator attribute (often the sort
//! key) tells them apart. Matching is pure and allocation-free once a
//! [`DiscriminatorMatcher`] has been compiled from its spec.

use serde::{Deserialize, Serialize};

use lumadb_common::error::{MappingError, SchemaError};

use crate::wire::{AttributeValue, Item};

const WILDCARD: char = '*';

/// String-matching strategy of a discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    ExactMatch,
    StartsWith,
    EndsWith,
    Contains,
    ComplexPattern,
}

/// Declared discriminator of an entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscriminatorSpec {
    /// Wire attribute checked
    pub attribute: String,
    pub strategy: MatchStrategy,
    /// Literal (exact match) or wildcard pattern
    pub pattern: String,
    /// Literal written by `to_item`; exact-match specs default to the pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl DiscriminatorSpec {
    pub fn new(
        attribute: impl Into<String>,
        strategy: MatchStrategy,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            strategy,
            pattern: pattern.into(),
            value: None,
        }
    }

    /// Exact-match discriminator whose literal is also written on encode
    pub fn exact(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(attribute, MatchStrategy::ExactMatch, value)
    }

    /// Infer the strategy from wildcard placement: `X*` starts-with, `*X`
    /// ends-with, `*X*` contains, inner wildcards complex, none exact.
    pub fn from_pattern(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let strategy = infer_strategy(&pattern);
        Self::new(attribute, strategy, pattern)
    }

    /// Literal to write on encode, overriding the default
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// The literal `to_item` writes, if any
    #[must_use]
    pub fn literal(&self) -> Option<&str> {
        match (&self.value, self.strategy) {
            (Some(value), _) => Some(value),
            (None, MatchStrategy::ExactMatch) => Some(&self.pattern),
            (None, _) => None,
        }
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.attribute.is_empty() {
            return Err(SchemaError::EmptyName {
                what: "discriminator attribute".to_string(),
            });
        }
        let needle_empty = self.pattern.chars().all(|c| c == WILDCARD);
        if needle_empty {
            return Err(SchemaError::InvalidPattern {
                pattern: self.pattern.clone(),
                reason: "pattern has no literal text".to_string(),
            });
        }
        if self.strategy == MatchStrategy::ExactMatch && self.pattern.contains(WILDCARD) {
            return Err(SchemaError::InvalidPattern {
                pattern: self.pattern.clone(),
                reason: "exact match cannot contain wildcards".to_string(),
            });
        }
        if let Some(value) = &self.value {
            if !DiscriminatorMatcher::new(self).matches_value(Some(value)) {
                return Err(SchemaError::InvalidPattern {
                    pattern: self.pattern.clone(),
                    reason: format!("written value '{}' does not match", value),
                });
            }
        }
        Ok(())
    }
}

fn infer_strategy(pattern: &str) -> MatchStrategy {
    let trimmed = pattern.trim_matches(WILDCARD);
    if trimmed.contains(WILDCARD) {
        return MatchStrategy::ComplexPattern;
    }
    match (pattern.starts_with(WILDCARD), pattern.ends_with(WILDCARD)) {
        (false, false) => MatchStrategy::ExactMatch,
        (false, true) => MatchStrategy::StartsWith,
        (true, false) => MatchStrategy::EndsWith,
        (true, true) => MatchStrategy::Contains,
    }
}

/// Compiled form of a [`DiscriminatorSpec`].
#[derive(Debug, Clone)]
pub struct DiscriminatorMatcher {
    attribute: String,
    strategy: MatchStrategy,
    expected: String,
    needle: String,
    segments: Vec<String>,
}

impl DiscriminatorMatcher {
    #[must_use]
    pub fn new(spec: &DiscriminatorSpec) -> Self {
        let segments = spec
            .pattern
            .split(WILDCARD)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self {
            attribute: spec.attribute.clone(),
            strategy: spec.strategy,
            expected: spec.pattern.clone(),
            needle: spec.pattern.replace(WILDCARD, ""),
            segments,
        }
    }

    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Does the item's discriminator attribute match?
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        self.matches_value(item.get(&self.attribute).and_then(AttributeValue::scalar_text))
    }

    /// Test a bare sort-key value.
    #[must_use]
    pub fn matches_sort_key(&self, sort_key: Option<&str>) -> bool {
        self.matches_value(sort_key)
    }

    fn matches_value(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self.strategy {
            MatchStrategy::ExactMatch => value == self.expected,
            MatchStrategy::StartsWith => value.starts_with(&self.needle),
            MatchStrategy::EndsWith => value.ends_with(&self.needle),
            MatchStrategy::Contains => value.contains(&self.needle),
            MatchStrategy::ComplexPattern => segments_in_order(value, &self.segments),
        }
    }

    /// Fail with [`MappingError::DiscriminatorMismatch`] unless the item matches.
    pub fn check(&self, entity_kind: &str, item: &Item) -> Result<(), MappingError> {
        if self.matches(item) {
            return Ok(());
        }
        Err(MappingError::DiscriminatorMismatch {
            entity_kind: entity_kind.to_string(),
            expected: self.expected.clone(),
            actual: item
                .get(&self.attribute)
                .and_then(AttributeValue::scalar_text)
                .map(String::from),
        })
    }
}

/// All segments found left to right without overlapping.
fn segments_in_order(value: &str, segments: &[String]) -> bool {
    let mut rest = value;
    for segment in segments {
        match rest.find(segment.as_str()) {
            Some(at) => rest = &rest[at + segment.len()..],
            None => return false,
        }
    }
    true
}

/// Does `item` belong to the kind described by `spec`?
#[must_use]
pub fn matches(item: &Item, spec: &DiscriminatorSpec) -> bool {
    DiscriminatorMatcher::new(spec).matches(item)
}

/// Does a sort-key value satisfy `spec`?
#[must_use]
pub fn matches_sort_key(sort_key: Option<&str>, spec: &DiscriminatorSpec) -> bool {
    DiscriminatorMatcher::new(spec).matches_sort_key(sort_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(attr: &str, value: &str) -> Item {
        Item::from([(attr.to_string(), AttributeValue::S(value.to_string()))])
    }

    #[test]
    fn test_starts_with() {
        let spec = DiscriminatorSpec::new("sk", MatchStrategy::StartsWith, "USER#*");
        assert!(matches(&item("sk", "USER#42"), &spec));
        assert!(!matches(&item("sk", "ORDER#42"), &spec));
    }

    #[test]
    fn test_exact() {
        let spec = DiscriminatorSpec::exact("entity_type", "USER");
        assert!(matches(&item("entity_type", "USER"), &spec));
        assert!(!matches(&item("entity_type", "USER#1"), &spec));
        assert_eq!(spec.literal(), Some("USER"));
    }

    #[test]
    fn test_ends_with_and_contains() {
        let ends = DiscriminatorSpec::new("sk", MatchStrategy::EndsWith, "*#META");
        assert!(matches_sort_key(Some("USER#1#META"), &ends));
        assert!(!matches_sort_key(Some("USER#1#META#2"), &ends));

        let contains = DiscriminatorSpec::new("sk", MatchStrategy::Contains, "*#ORDER#*");
        assert!(matches_sort_key(Some("USER#1#ORDER#9"), &contains));
        assert!(!matches_sort_key(Some("USER#1"), &contains));
    }

    #[test]
    fn test_complex_pattern_in_order() {
        let spec = DiscriminatorSpec::new("sk", MatchStrategy::ComplexPattern, "USER#*#ORDER#*");
        assert!(matches_sort_key(Some("USER#1#ORDER#2"), &spec));
        assert!(!matches_sort_key(Some("#ORDER#2#USER#1"), &spec));
    }

    #[test]
    fn test_complex_pattern_non_overlapping() {
        let spec = DiscriminatorSpec::new("sk", MatchStrategy::ComplexPattern, "*ABA*ABA*");
        assert!(!matches_sort_key(Some("ABABA"), &spec));
        assert!(matches_sort_key(Some("ABAxABA"), &spec));
    }

    #[test]
    fn test_absent_value_never_matches() {
        for strategy in [
            MatchStrategy::ExactMatch,
            MatchStrategy::StartsWith,
            MatchStrategy::EndsWith,
            MatchStrategy::Contains,
            MatchStrategy::ComplexPattern,
        ] {
            let spec = DiscriminatorSpec::new("sk", strategy, "USER#*");
            assert!(!matches_sort_key(None, &spec));
            assert!(!matches(&Item::new(), &spec));
        }
    }

    #[test]
    fn test_non_string_attributes() {
        let spec = DiscriminatorSpec::exact("version", "2");
        let numeric = Item::from([("version".to_string(), AttributeValue::N("2".into()))]);
        assert!(matches(&numeric, &spec));

        let binary = Item::from([("version".to_string(), AttributeValue::B(vec![2]))]);
        assert!(!matches(&binary, &spec));
    }

    #[test]
    fn test_infer_strategy() {
        let cases = [
            ("USER", MatchStrategy::ExactMatch),
            ("USER#*", MatchStrategy::StartsWith),
            ("*#META", MatchStrategy::EndsWith),
            ("*ORDER*", MatchStrategy::Contains),
            ("USER#*#ORDER#*", MatchStrategy::ComplexPattern),
        ];
        for (pattern, expected) in cases {
            assert_eq!(DiscriminatorSpec::from_pattern("sk", pattern).strategy, expected);
        }
    }

    #[test]
    fn test_check_reports_actual() {
        let matcher = DiscriminatorMatcher::new(&DiscriminatorSpec::exact("type", "USER"));
        let err = matcher.check("User", &item("type", "ORDER")).unwrap_err();
        match err {
            MappingError::DiscriminatorMismatch {
                entity_kind,
                expected,
                actual,
            } => {
                assert_eq!(entity_kind, "User");
                assert_eq!(expected, "USER");
                assert_eq!(actual.as_deref(), Some("ORDER"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate() {
        assert!(DiscriminatorSpec::from_pattern("sk", "*").validate().is_err());
        assert!(DiscriminatorSpec::exact("", "USER").validate().is_err());
        assert!(DiscriminatorSpec::new("sk", MatchStrategy::ExactMatch, "A*")
            .validate()
            .is_err());
        assert!(DiscriminatorSpec::from_pattern("sk", "USER#*")
            .with_value("ORDER")
            .validate()
            .is_err());
        assert!(DiscriminatorSpec::from_pattern("sk", "USER#*")
            .with_value("USER#")
            .validate()
            .is_ok());
    }
}
