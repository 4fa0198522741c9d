use serde::{Deserialize, Serialize};

use crate::BuildDirection;

/// Provenance capability attached to data sets and partial updates.
///
/// `()` is the no-metadata shape: it merges to nothing and renders no column.
pub trait MetaData: Clone + std::fmt::Debug + Default + PartialEq {
    /// Fold `other` into `self`.
    fn merge(&mut self, other: &Self);

    /// CSV column text; `None` omits the column.
    fn render(&self) -> Option<String>;
}

impl MetaData for () {
    fn merge(&mut self, _other: &Self) {}

    fn render(&self) -> Option<String> {
        None
    }
}

const SOURCE_SEPARATOR: char = '+';

/// Source label plus the build direction the data arrived through.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct Provenance {
    pub source: String,
    pub direction: Option<BuildDirection>,
}

impl Provenance {
    #[must_use]
    pub fn new(source: &str, direction: Option<BuildDirection>) -> Self {
        Self { source: source.to_string(), direction }
    }

    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        self.source.split(SOURCE_SEPARATOR).filter(|part| !part.is_empty()).collect()
    }
}

impl MetaData for Provenance {
    /// Source labels are unioned in first-seen order; differing directions collapse to `None`.
    fn merge(&mut self, other: &Self) {
        for source in other.sources() {
            if !self.sources().contains(&source) {
                if !self.source.is_empty() {
                    self.source.push(SOURCE_SEPARATOR);
                }
                self.source.push_str(source);
            }
        }

        self.direction = match (self.direction, other.direction) {
            (None, incoming) => incoming,
            (current, None) => current,
            (Some(current), Some(incoming)) if current == incoming => Some(current),
            _ => None,
        };
    }

    fn render(&self) -> Option<String> {
        match self.direction {
            Some(direction) => Some(format!("{}:{}", self.source, direction.as_str())),
            None => Some(self.source.clone()),
        }
    }
}
