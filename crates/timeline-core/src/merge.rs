use std::cmp::Ordering;

use crate::{Ledger, LedgerDate, MetaData, Record, TimelineError};

/// Sorted merge-join of two ledgers.
///
/// Dates held by only one side pass through. Coinciding dates must carry equal
/// records; the `high` side's data set (and so its metadata) is kept. Unequal
/// records are a hard error and are never resolved by priority.
#[derive(Debug, Clone, Copy)]
pub struct PriorityMerge<'a, D, R, M = ()> {
    high: &'a Ledger<D, R, M>,
    low: &'a Ledger<D, R, M>,
}

impl<'a, D: LedgerDate, R: Record, M: MetaData> PriorityMerge<'a, D, R, M> {
    #[must_use]
    pub fn new(high: &'a Ledger<D, R, M>, low: &'a Ledger<D, R, M>) -> Self {
        Self { high, low }
    }

    /// # Errors
    /// Returns [`TimelineError::RecordMismatch`] at the first coinciding date
    /// whose records differ.
    pub fn merge_result(&self) -> Result<Ledger<D, R, M>, TimelineError> {
        let mut merged = Ledger::new();
        let mut high = self.high.iter().peekable();
        let mut low = self.low.iter().peekable();

        loop {
            let ordering = match (high.peek(), low.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((high_date, _)), Some((low_date, _))) => high_date.cmp(low_date),
            };

            let (date, dataset) = match ordering {
                Ordering::Less => high.next(),
                Ordering::Greater => low.next(),
                Ordering::Equal => {
                    let kept = high.next();
                    let other = low.next();
                    if let (Some((date, high_set)), Some((_, low_set))) = (kept, other) {
                        if high_set != low_set {
                            return Err(TimelineError::RecordMismatch {
                                date: date.to_string(),
                                high: high_set.record().render(','),
                                low: low_set.record().render(','),
                            });
                        }
                    }
                    kept
                }
            }
            .ok_or_else(|| TimelineError::InvalidUpdate("merge cursor exhausted".to_string()))?;

            merged.insert_version(date.clone(), dataset.clone())?;
        }

        tracing::debug!(
            high = self.high.len(),
            low = self.low.len(),
            merged = merged.len(),
            "priority merge complete"
        );
        Ok(merged)
    }
}
