use crate::render::CsvOptions;
use crate::{MetaData, Record, RECORD_MARKER};

/// A fully specified point-in-time state: a complete record plus provenance.
///
/// Equality compares only the record; use [`DataSet::same_with_metadata`] to
/// include provenance.
#[derive(Debug, Clone)]
pub struct DataSet<R, M = ()> {
    record: R,
    metadata: M,
}

impl<R: Record, M: MetaData> DataSet<R, M> {
    #[must_use]
    pub fn new(record: R) -> Self {
        Self { record, metadata: M::default() }
    }

    #[must_use]
    pub fn with_metadata(record: R, metadata: M) -> Self {
        Self { record, metadata }
    }

    #[must_use]
    pub fn record(&self) -> &R {
        &self.record
    }

    #[must_use]
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    #[must_use]
    pub fn into_record(self) -> R {
        self.record
    }

    #[must_use]
    pub fn same_with_metadata(&self, other: &Self) -> bool {
        self.record == other.record && self.metadata == other.metadata
    }

    /// Row body after the date column: optional metadata, then every field.
    #[must_use]
    pub fn render_row(&self, options: &CsvOptions) -> String {
        let mut row = String::new();
        if options.markers {
            row.push_str(RECORD_MARKER);
            row.push(options.delimiter);
        }
        if options.include_metadata {
            if let Some(label) = self.metadata.render() {
                row.push_str(&label);
                row.push(options.delimiter);
            }
        }
        row.push_str(&self.record.render(options.delimiter));
        row
    }
}

impl<R: PartialEq, M> PartialEq for DataSet<R, M> {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}
