//! Entity-kind filters for subscriptions

use super::types::{EntityKind, UnknownEntityKind};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while parsing the `entities` request parameter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("unknown entity kinds: {}", .0.join(", "))]
    UnknownKinds(Vec<String>),
}

/// The set of entity kinds a subscription wants to receive.
///
/// An empty filter accepts every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    kinds: HashSet<EntityKind>,
}

impl EntityFilter {
    /// Accept every entity kind
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only the given kinds (an empty iterator means all kinds)
    pub fn only(kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list such as `"Attendance,schedule"`.
    ///
    /// `None`, an empty string, or a list of blanks yields [`EntityFilter::all`].
    /// Any unrecognised name rejects the whole list.
    pub fn parse(raw: Option<&str>) -> Result<Self, FilterError> {
        let Some(raw) = raw else {
            return Ok(Self::all());
        };

        let mut kinds = HashSet::new();
        let mut unknown = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match part.parse::<EntityKind>() {
                Ok(kind) => {
                    kinds.insert(kind);
                }
                Err(UnknownEntityKind(name)) => unknown.push(name),
            }
        }

        if !unknown.is_empty() {
            return Err(FilterError::UnknownKinds(unknown));
        }
        Ok(Self { kinds })
    }

    pub fn accepts(&self, kind: EntityKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    pub fn is_all(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Kinds in declaration order, for logging
    pub fn kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|k| self.kinds.contains(k))
            .collect()
    }
}
