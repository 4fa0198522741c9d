use std::collections::BTreeMap;
use std::fmt::{Debug, Display};

use sha2::{Digest, Sha256};

use crate::render::CsvOptions;
use crate::{DataSet, MetaData, Record, TimelineError};

/// Totally ordered key with a textual form, e.g. [`ListingDate`](crate::ListingDate).
pub trait LedgerDate: Ord + Clone + Debug + Display {}

impl<T> LedgerDate for T where T: Ord + Clone + Debug + Display {}

/// Gap-free timeline: the data set at a date holds until the next later date.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger<D, R, M = ()> {
    versions: BTreeMap<D, DataSet<R, M>>,
}

impl<D, R, M> Default for Ledger<D, R, M> {
    fn default() -> Self {
        Self { versions: BTreeMap::new() }
    }
}

impl<D: LedgerDate, R: Record, M: MetaData> Ledger<D, R, M> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `dataset` at `date`.
    ///
    /// Returns `Ok(false)` without writing when an equal record already sits
    /// at `date`.
    ///
    /// # Errors
    /// Returns [`TimelineError::Conflict`] when a different record sits at `date`.
    pub fn insert_version(&mut self, date: D, dataset: DataSet<R, M>) -> Result<bool, TimelineError> {
        if !self.check_version(&date, &dataset)? {
            return Ok(false);
        }
        tracing::trace!(date = %date, "ledger version inserted");
        self.versions.insert(date, dataset);
        Ok(true)
    }

    /// Probe [`Ledger::insert_version`] without writing: `Ok(true)` if the
    /// insert would write.
    ///
    /// # Errors
    /// Returns [`TimelineError::Conflict`] when a different record sits at `date`.
    pub fn check_version(&self, date: &D, dataset: &DataSet<R, M>) -> Result<bool, TimelineError> {
        match self.versions.get(date) {
            None => Ok(true),
            Some(existing) if existing == dataset => Ok(false),
            Some(existing) => Err(TimelineError::Conflict {
                date: date.to_string(),
                existing: existing.record().render(','),
                incoming: dataset.record().render(','),
            }),
        }
    }

    /// Data set in force at `date`: the entry at the greatest key `<= date`.
    #[must_use]
    pub fn version_at(&self, date: &D) -> Option<&DataSet<R, M>> {
        self.entry_at(date).map(|(_, dataset)| dataset)
    }

    #[must_use]
    pub fn entry_at(&self, date: &D) -> Option<(&D, &DataSet<R, M>)> {
        self.versions.range(..=date).next_back()
    }

    /// Entry at the greatest key strictly before `date`.
    #[must_use]
    pub fn version_before(&self, date: &D) -> Option<&DataSet<R, M>> {
        self.versions.range(..date).next_back().map(|(_, dataset)| dataset)
    }

    #[must_use]
    pub fn dataset_ledger(&self) -> &BTreeMap<D, DataSet<R, M>> {
        &self.versions
    }

    pub fn iter(&self) -> impl Iterator<Item = (&D, &DataSet<R, M>)> {
        self.versions.iter()
    }

    #[must_use]
    pub fn contains(&self, date: &D) -> bool {
        self.versions.contains_key(date)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<(&D, &DataSet<R, M>)> {
        self.versions.iter().next()
    }

    #[must_use]
    pub fn last(&self) -> Option<(&D, &DataSet<R, M>)> {
        self.versions.iter().next_back()
    }

    #[must_use]
    pub fn dates(&self) -> Vec<D> {
        self.versions.keys().cloned().collect()
    }

    /// One line per entry: `<date>,[<metadata>,]<field0>,<field1>,...`.
    #[must_use]
    pub fn to_csv(&self, options: &CsvOptions) -> String {
        let mut out = String::new();
        for (date, dataset) in &self.versions {
            out.push_str(&date.to_string());
            out.push(options.delimiter);
            out.push_str(&dataset.render_row(options));
            out.push('\n');
        }
        out
    }

    /// SHA-256 hex digest of the default CSV projection, including metadata.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_csv(&CsvOptions::default()).as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
