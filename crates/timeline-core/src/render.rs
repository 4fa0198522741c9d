//! Read-only CSV projection settings.

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CsvOptions {
    pub delimiter: char,
    /// Emit the metadata column when the metadata type renders one.
    pub include_metadata: bool,
    /// Prefix rows with `[IsRECORD]` / `[FORWARD]` / `[REVERSE]`.
    pub markers: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self { delimiter: ',', include_metadata: true, markers: false }
    }
}

/// Delimiter between the old and new value of a delta field.
pub const DELTA_ARROW: &str = "->";
