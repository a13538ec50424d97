use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::catalog::AttributeKind;

/// Set of attributes chosen for transfer. May be empty, in which case the
/// composed directive leaves the identity plate untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSelection {
    kinds: BTreeSet<AttributeKind>,
}

impl AttributeSelection {
    pub fn empty() -> Self {
        Self {
            kinds: BTreeSet::new(),
        }
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = AttributeKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn contains(&self, kind: AttributeKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn insert(&mut self, kind: AttributeKind) -> bool {
        self.kinds.insert(kind)
    }

    pub fn remove(&mut self, kind: AttributeKind) -> bool {
        self.kinds.remove(&kind)
    }

    /// Flips membership and returns whether the kind is now selected.
    pub fn toggle(&mut self, kind: AttributeKind) -> bool {
        if self.kinds.remove(&kind) {
            false
        } else {
            self.kinds.insert(kind);
            true
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn ordered(&self) -> Vec<AttributeKind> {
        AttributeKind::ALL
            .into_iter()
            .filter(|kind| self.kinds.contains(kind))
            .collect()
    }
}

impl Default for AttributeSelection {
    fn default() -> Self {
        Self::from_kinds([AttributeKind::Expression])
    }
}

impl Serialize for AttributeSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ordered().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttributeSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kinds = Vec::<AttributeKind>::deserialize(deserializer)?;
        Ok(Self::from_kinds(kinds))
    }
}
