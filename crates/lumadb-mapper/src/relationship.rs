//! Multi-item relationship assembly
//!
//! One logical entity may be spread over several physical items sharing a
//! partition key. Each [`RelationshipSpec`] claims the items whose sort key
//! matches its pattern; the first matching spec in declaration order wins.
//! Items no spec claims are ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use lumadb_common::error::{Direction, MappingError, SchemaError};

use crate::discriminator::{DiscriminatorMatcher, DiscriminatorSpec, MatchStrategy};
use crate::hooks::CodecContext;
use crate::native::{NativeValue, Record};
use crate::wire::{AttributeValue, Item};

const WILDCARD: char = '*';
const SEGMENT: char = '#';

/// Declares that a property is populated from related items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    /// Owning property
    pub property: String,
    /// `prefix#*`, a bare literal, or a wildcard pattern
    pub sort_key_pattern: String,
    /// Collection properties collect every match; singular ones take one
    #[serde(default)]
    pub collection: bool,
    pub related_kind: String,
}

impl RelationshipSpec {
    pub fn one(
        property: impl Into<String>,
        sort_key_pattern: impl Into<String>,
        related_kind: impl Into<String>,
    ) -> Self {
        Self {
            property: property.into(),
            sort_key_pattern: sort_key_pattern.into(),
            collection: false,
            related_kind: related_kind.into(),
        }
    }

    pub fn many(
        property: impl Into<String>,
        sort_key_pattern: impl Into<String>,
        related_kind: impl Into<String>,
    ) -> Self {
        Self {
            collection: true,
            ..Self::one(property, sort_key_pattern, related_kind)
        }
    }

    /// Could both specs claim the same sort key?
    #[must_use]
    pub fn overlaps(&self, other: &RelationshipSpec) -> bool {
        SortKeyMatcher::new(&self.sort_key_pattern)
            .overlaps(&SortKeyMatcher::new(&other.sort_key_pattern))
    }
}

/// Compiled sort-key pattern of a relationship.
#[derive(Debug, Clone)]
enum SortKeyMatcher {
    /// Bare literal: the literal itself or `literal#...`
    Literal { exact: String, nested: String },
    /// `prefix*`
    Prefix(String),
    /// Inner wildcards
    Pattern {
        head: Option<String>,
        matcher: DiscriminatorMatcher,
    },
}

impl SortKeyMatcher {
    fn new(pattern: &str) -> Self {
        let inner = pattern.trim_end_matches(WILDCARD);
        if !pattern.contains(WILDCARD) {
            return SortKeyMatcher::Literal {
                exact: pattern.to_string(),
                nested: format!("{}{}", pattern, SEGMENT),
            };
        }
        if !inner.contains(WILDCARD) {
            return SortKeyMatcher::Prefix(inner.to_string());
        }
        let spec = DiscriminatorSpec::new("", MatchStrategy::ComplexPattern, pattern);
        let head = pattern
            .split(WILDCARD)
            .next()
            .filter(|h| !h.is_empty())
            .map(String::from);
        SortKeyMatcher::Pattern {
            head,
            matcher: DiscriminatorMatcher::new(&spec),
        }
    }

    fn matches(&self, sort_key: &str) -> bool {
        match self {
            SortKeyMatcher::Literal { exact, nested } => {
                sort_key == exact || sort_key.starts_with(nested.as_str())
            }
            SortKeyMatcher::Prefix(prefix) => sort_key.starts_with(prefix.as_str()),
            SortKeyMatcher::Pattern { head, matcher } => {
                head.as_deref().map_or(true, |h| sort_key.starts_with(h))
                    && matcher.matches_sort_key(Some(sort_key))
            }
        }
    }

    /// Leading constant every match starts with, if any
    fn head(&self) -> Option<&str> {
        match self {
            SortKeyMatcher::Literal { exact, .. } => Some(exact),
            SortKeyMatcher::Prefix(prefix) => Some(prefix),
            SortKeyMatcher::Pattern { head, .. } => head.as_deref(),
        }
    }

    /// Conservative: true unless the two can be shown disjoint.
    fn overlaps(&self, other: &SortKeyMatcher) -> bool {
        match (self, other) {
            (
                SortKeyMatcher::Literal { exact: a, nested: na },
                SortKeyMatcher::Literal { exact: b, nested: nb },
            ) => a == b || a.starts_with(nb.as_str()) || b.starts_with(na.as_str()),
            (SortKeyMatcher::Literal { exact, nested }, SortKeyMatcher::Prefix(p))
            | (SortKeyMatcher::Prefix(p), SortKeyMatcher::Literal { exact, nested }) => {
                exact.starts_with(p.as_str())
                    || nested.starts_with(p.as_str())
                    || p.starts_with(nested.as_str())
            }
            _ => match (self.head(), other.head()) {
                (Some(a), Some(b)) => a.starts_with(b) || b.starts_with(a),
                _ => true,
            },
        }
    }
}

/// Decodes an item as a related entity kind.
#[async_trait]
pub trait RelatedDecoder: Send + Sync {
    async fn decode_related(
        &self,
        related_kind: &str,
        item: &Item,
        ctx: &CodecContext,
    ) -> Result<Record, MappingError>;
}

/// Routes related items to the properties that own them.
#[derive(Debug, Clone)]
pub struct RelationshipAssembler {
    sort_key_attribute: String,
    routes: Vec<(RelationshipSpec, SortKeyMatcher)>,
}

impl RelationshipAssembler {
    pub fn new(
        sort_key_attribute: impl Into<String>,
        specs: &[RelationshipSpec],
    ) -> Result<Self, SchemaError> {
        let mut routes = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.sort_key_pattern.chars().all(|c| c == WILDCARD) {
                return Err(SchemaError::InvalidPattern {
                    pattern: spec.sort_key_pattern.clone(),
                    reason: "relationship pattern has no literal text".to_string(),
                });
            }
            routes.push((spec.clone(), SortKeyMatcher::new(&spec.sort_key_pattern)));
        }
        Ok(Self {
            sort_key_attribute: sort_key_attribute.into(),
            routes,
        })
    }

    pub fn specs(&self) -> impl Iterator<Item = &RelationshipSpec> {
        self.routes.iter().map(|(spec, _)| spec)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First spec whose pattern matches the sort key
    pub fn route_sort_key(&self, sort_key: Option<&str>) -> Option<&RelationshipSpec> {
        let sort_key = sort_key?;
        self.routes
            .iter()
            .find(|(_, matcher)| matcher.matches(sort_key))
            .map(|(spec, _)| spec)
    }

    /// First spec claiming `item`
    pub fn route(&self, item: &Item) -> Option<&RelationshipSpec> {
        self.route_sort_key(
            item.get(&self.sort_key_attribute)
                .and_then(AttributeValue::scalar_text),
        )
    }

    /// Decode every claimed item into `owner`, skipping the owner's own item.
    ///
    /// Items are decoded one at a time in item order, so the first failing
    /// item is the one reported.
    pub async fn assemble(
        &self,
        mut owner: Record,
        items: &[Item],
        owner_index: Option<usize>,
        decoder: &dyn RelatedDecoder,
        ctx: &CodecContext,
    ) -> Result<Record, MappingError> {
        let owner_kind = owner.kind().to_string();
        let mut claimed = 0usize;

        for (position, item) in items.iter().enumerate() {
            if Some(position) == owner_index {
                continue;
            }
            let Some(spec) = self.route(item) else {
                trace!(position, "Ignoring item claimed by no relationship");
                continue;
            };
            let related = decoder
                .decode_related(&spec.related_kind, item, ctx)
                .await
                .map_err(|e| e.property(&owner_kind, &spec.property, &spec.related_kind, Direction::Decode))?;
            place(&mut owner, spec, related);
            claimed += 1;
        }

        debug!(
            kind = %owner_kind,
            items = items.len(),
            claimed,
            "Assembled multi-item entity"
        );
        Ok(owner)
    }
}

fn place(owner: &mut Record, spec: &RelationshipSpec, related: Record) {
    if spec.collection {
        owner.push(&spec.property, NativeValue::Entity(related));
    } else {
        owner.set(spec.property.clone(), NativeValue::Entity(related));
    }
}
