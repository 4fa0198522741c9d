use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Per-position tag of a partial update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldPatch {
    /// Untouched: the value is authoritative, not a change.
    #[default]
    FullRecord,
    /// Changed from a recorded old value to a recorded new value.
    DeltaChange,
    /// Asserted anew with no prior value.
    Snapshot,
}

impl FieldPatch {
    #[must_use]
    pub fn is_touched(self) -> bool {
        !matches!(self, Self::FullRecord)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullRecord => "full_record",
            Self::DeltaChange => "delta_change",
            Self::Snapshot => "snapshot",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildDirection {
    Forward,
    Reverse,
}

impl BuildDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "forward" => Some(Self::Forward),
            "reverse" => Some(Self::Reverse),
            _ => None,
        }
    }

    /// Row prefix used when rendering partial updates.
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Forward => "[FORWARD]",
            Self::Reverse => "[REVERSE]",
        }
    }
}

impl Display for BuildDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row prefix for materialized data sets.
pub const RECORD_MARKER: &str = "[IsRECORD]";

/// Positions already written within the current date-group.
///
/// Reset whenever a build walk crosses into a new date.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FieldMask(Vec<bool>);

impl FieldMask {
    #[must_use]
    pub fn new(field_count: usize) -> Self {
        Self(vec![false; field_count])
    }

    #[must_use]
    pub fn is_set(&self, field: usize) -> bool {
        self.0.get(field).copied().unwrap_or(false)
    }

    pub fn set(&mut self, field: usize) {
        if let Some(slot) = self.0.get_mut(field) {
            *slot = true;
        }
    }

    pub fn reset(&mut self) {
        self.0.iter_mut().for_each(|slot| *slot = false);
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.iter().filter(|slot| **slot).count()
    }
}
