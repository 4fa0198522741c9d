use std::collections::BTreeMap;

use crate::update::Validation;
use crate::{
    BuildDirection, DataSet, FieldMask, FieldPatch, Ledger, LedgerDate, MetaData, PartialUpdate,
    Record, TimelineError, UpdateShape,
};

/// Counts reported by [`TimelineBuilder::build_bidirectional_timeline`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BiDirectionalOutcome {
    /// Updates whose date-group produced a new ledger entry. A date-group
    /// landing on an equal existing entry (an anchor, or a rerun) validates
    /// but is not counted here, so identical reruns report zero.
    pub applied: usize,
    /// Updates in committed segments, whether or not they wrote an entry.
    pub validated: usize,
    /// Updates in segments rejected by a validation or ledger conflict.
    pub conflicts: usize,
    /// One error per rejected segment, in segment order.
    pub failures: Vec<TimelineError>,
}

impl BiDirectionalOutcome {
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        (self.applied, self.conflicts)
    }
}

/// Result of [`TimelineBuilder::remove_historical_delta_version_artifacts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReport<D> {
    /// Pending dates fully reflected in the ledger; removed from the builder.
    pub existing_dates: Vec<D>,
    /// Pending dates the ledger contradicts; left pending.
    pub mismatched_dates: Vec<D>,
}

impl<D> Default for ArtifactReport<D> {
    fn default() -> Self {
        Self { existing_dates: Vec::new(), mismatched_dates: Vec::new() }
    }
}

#[derive(Debug)]
struct Staged<D, R, M> {
    date: D,
    dataset: DataSet<R, M>,
    updates: usize,
}

/// Accumulates partial updates by date and materializes them into a [`Ledger`].
///
/// A successful build consumes the pending updates unless the builder was
/// created with [`TimelineBuilder::preserving`]. A failed build leaves them in
/// place and does not touch the ledger; clone the builder first for
/// try-then-rollback workflows.
#[derive(Debug, Clone)]
pub struct TimelineBuilder<D, R, M = ()> {
    pending: BTreeMap<D, Vec<PartialUpdate<R, M>>>,
    preserve_pending: bool,
}

impl<D, R, M> Default for TimelineBuilder<D, R, M> {
    fn default() -> Self {
        Self { pending: BTreeMap::new(), preserve_pending: false }
    }
}

impl<D: LedgerDate, R: Record, M: MetaData> TimelineBuilder<D, R, M> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose pending updates survive successful builds.
    #[must_use]
    pub fn preserving() -> Self {
        Self { pending: BTreeMap::new(), preserve_pending: true }
    }

    /// Queue a changes-shaped update.
    ///
    /// Returns `Ok(false)` when every position it touches is already touched
    /// at `date` with the same values. Otherwise the positions not yet
    /// touched are queued, merged into a compatible update at `date` when one
    /// exists.
    ///
    /// # Errors
    /// Returns [`TimelineError::InvalidUpdate`] for snapshot-shaped updates and
    /// [`TimelineError::DoubleModification`] when a position already touched at
    /// `date` would take a different value.
    pub fn insert_delta_version(
        &mut self,
        date: D,
        update: PartialUpdate<R, M>,
    ) -> Result<bool, TimelineError> {
        if update.shape() != UpdateShape::Changes {
            return Err(TimelineError::InvalidUpdate(format!(
                "insert_delta_version at {date} requires a changes update"
            )));
        }
        self.insert_pending(date, update)
    }

    /// Queue a snapshot-shaped update; same duplicate and overlap rules as
    /// [`TimelineBuilder::insert_delta_version`].
    ///
    /// # Errors
    /// Returns [`TimelineError::InvalidUpdate`] for changes-shaped updates and
    /// [`TimelineError::DoubleModification`] on a conflicting overlap.
    pub fn insert_snapshot_version(
        &mut self,
        date: D,
        update: PartialUpdate<R, M>,
    ) -> Result<bool, TimelineError> {
        if update.shape() != UpdateShape::Snapshot {
            return Err(TimelineError::InvalidUpdate(format!(
                "insert_snapshot_version at {date} requires a snapshot update"
            )));
        }
        self.insert_pending(date, update)
    }

    fn insert_pending(&mut self, date: D, update: PartialUpdate<R, M>) -> Result<bool, TimelineError> {
        let Some(group) = self.pending.get_mut(&date) else {
            self.pending.insert(date, vec![update]);
            return Ok(true);
        };

        let mut fresh = Vec::new();
        for field in update.touched_fields() {
            match group.iter().find(|existing| existing.touches(field)) {
                None => fresh.push(field),
                Some(existing) if existing.field_agrees(&update, field) => {}
                Some(_) => {
                    return Err(TimelineError::DoubleModification {
                        date: date.to_string(),
                        field,
                        field_name: R::field_name(field),
                    });
                }
            }
        }

        if fresh.is_empty() {
            tracing::debug!(date = %date, "duplicate partial update ignored");
            return Ok(false);
        }

        let residual = if fresh.len() == update.touched_count() {
            update
        } else {
            update.restricted_to(&fresh)
        };

        let compatible = group.iter_mut().find(|existing| {
            existing.shape() == residual.shape() && existing.direction() == residual.direction()
        });
        match compatible {
            Some(existing) => {
                existing.merge_from(&residual, &date)?;
            }
            None => group.push(residual),
        }
        Ok(true)
    }

    /// Walk pending updates forward from `start` at `start_date`, writing one
    /// ledger entry per pending date plus the start entry. Returns the number
    /// of entries written.
    ///
    /// # Errors
    /// Returns [`TimelineError::OrderingViolation`] unless `start_date` is
    /// strictly before the first pending date, any apply error from a
    /// date-group, or [`TimelineError::Conflict`] against existing entries.
    /// Nothing is written on error.
    pub fn build_forward_timeline(
        &mut self,
        ledger: &mut Ledger<D, R, M>,
        start_date: D,
        start: DataSet<R, M>,
        reset: &M,
    ) -> Result<usize, TimelineError> {
        if let Some(first) = self.pending.keys().next() {
            if start_date >= *first {
                return Err(ordering_violation("start", &start_date, "strictly before", first));
            }
        }

        let mut staged = vec![Staged { date: start_date, dataset: start.clone(), updates: 0 }];
        staged.extend(forward_walk(self.pending.iter(), start.into_record(), reset)?);
        let (written, applied) = commit(ledger, staged)?;
        tracing::info!(written, applied, "forward timeline built");
        self.consume_all();
        Ok(written)
    }

    /// Walk pending updates backward from `end` at `end_date`, undoing each
    /// delta, and write the reconstructed earliest state at `start_date`.
    /// Returns the number of entries written.
    ///
    /// # Errors
    /// Returns [`TimelineError::OrderingViolation`] unless `start_date` is
    /// strictly before the first pending date and `end_date` is at or after the
    /// last, [`TimelineError::DirectionMismatch`] for snapshot updates, any
    /// other apply error, or [`TimelineError::Conflict`]. Nothing is written on
    /// error.
    pub fn build_reverse_timeline(
        &mut self,
        ledger: &mut Ledger<D, R, M>,
        start_date: D,
        end_date: D,
        end: DataSet<R, M>,
        reset: &M,
    ) -> Result<usize, TimelineError> {
        if let (Some(first), Some(last)) = (self.pending.keys().next(), self.pending.keys().next_back())
        {
            if start_date >= *first {
                return Err(ordering_violation("start", &start_date, "strictly before", first));
            }
            if end_date < *last {
                return Err(ordering_violation("end", &end_date, "at or after", last));
            }
        } else if start_date >= end_date {
            return Err(ordering_violation("start", &start_date, "strictly before", &end_date));
        }

        let (mut walked, earliest) = reverse_walk(self.pending.iter(), end.record().clone(), reset)?;
        let mut staged = Vec::with_capacity(walked.len() + 2);
        match walked.first_mut() {
            // The end anchor sits on the last pending date: one entry carrying both labels.
            Some(latest) if latest.date == end_date => {
                let mut label = end.metadata().clone();
                label.merge(latest.dataset.metadata());
                latest.dataset = DataSet::with_metadata(end.into_record(), label);
            }
            _ => staged.push(Staged { date: end_date, dataset: end, updates: 0 }),
        }
        staged.extend(walked);
        staged.push(Staged {
            date: start_date,
            dataset: DataSet::with_metadata(earliest, reset.clone()),
            updates: 0,
        });
        let (written, applied) = commit(ledger, staged)?;
        tracing::info!(written, applied, "reverse timeline built");
        self.consume_all();
        Ok(written)
    }

    /// Materialize pending updates around `anchors`, dates at which `ledger`
    /// already holds full data sets.
    ///
    /// Pending dates are split into segments `(a[k-1], a[k]]`. The segment up
    /// to the first anchor is rebuilt in reverse from that anchor, its earliest
    /// state written at `origin` when given. The segment after the last anchor
    /// is rebuilt forward. A segment between two anchors is rebuilt in reverse
    /// from its right anchor when every update in it is tagged
    /// [`BuildDirection::Reverse`], otherwise forward from its left anchor.
    /// Either way the walk must land on the anchor at its far end, or the
    /// segment is rejected with [`TimelineError::Conflict`].
    ///
    /// Each segment commits all-or-nothing. A rejected segment is counted in
    /// [`BiDirectionalOutcome::conflicts`], reported in
    /// [`BiDirectionalOutcome::failures`], and its updates stay pending.
    ///
    /// # Errors
    /// Returns [`TimelineError::MissingAnchor`] when no anchors are given or one
    /// is absent from `ledger`, and [`TimelineError::OrderingViolation`] when
    /// `origin` is not strictly before the first pending date and first anchor.
    pub fn build_bidirectional_timeline(
        &mut self,
        anchors: &[D],
        ledger: &mut Ledger<D, R, M>,
        origin: Option<D>,
        reset: &M,
    ) -> Result<BiDirectionalOutcome, TimelineError> {
        let mut outcome = BiDirectionalOutcome::default();
        if self.pending.is_empty() {
            return Ok(outcome);
        }

        let mut anchors = anchors.to_vec();
        anchors.sort();
        anchors.dedup();
        if anchors.is_empty() {
            return Err(TimelineError::MissingAnchor { date: "(none supplied)".to_string() });
        }
        let mut anchor_records = Vec::with_capacity(anchors.len());
        for anchor in &anchors {
            let Some(dataset) = ledger.dataset_ledger().get(anchor) else {
                return Err(TimelineError::MissingAnchor { date: anchor.to_string() });
            };
            anchor_records.push(dataset.record().clone());
        }
        if let Some(origin) = &origin {
            for boundary in self.pending.keys().next().into_iter().chain(anchors.first()) {
                if origin >= boundary {
                    return Err(ordering_violation("origin", origin, "strictly before", boundary));
                }
            }
        }

        let mut segments: BTreeMap<usize, Vec<D>> = BTreeMap::new();
        for date in self.pending.keys() {
            let segment = anchors.partition_point(|anchor| anchor < date);
            segments.entry(segment).or_default().push(date.clone());
        }

        for (segment, dates) in segments {
            let groups: BTreeMap<D, Vec<PartialUpdate<R, M>>> = dates
                .iter()
                .filter_map(|date| self.pending.get(date).map(|group| (date.clone(), group.clone())))
                .collect();
            let update_count = groups.values().map(Vec::len).sum::<usize>();

            let staged = if segment == 0 {
                reverse_walk(groups.iter(), anchor_records[0].clone(), reset).map(
                    |(mut staged, earliest)| {
                        if let Some(origin) = &origin {
                            staged.push(Staged {
                                date: origin.clone(),
                                dataset: DataSet::with_metadata(earliest, reset.clone()),
                                updates: 0,
                            });
                        }
                        staged
                    },
                )
            } else if segment == anchors.len() {
                forward_walk(groups.iter(), anchor_records[segment - 1].clone(), reset)
            } else if groups
                .values()
                .flatten()
                .all(|update| update.direction() == BuildDirection::Reverse)
            {
                reverse_walk(groups.iter(), anchor_records[segment].clone(), reset).map(
                    |(mut staged, earliest)| {
                        staged.push(Staged {
                            date: anchors[segment - 1].clone(),
                            dataset: DataSet::with_metadata(earliest, reset.clone()),
                            updates: 0,
                        });
                        staged
                    },
                )
            } else {
                forward_walk(groups.iter(), anchor_records[segment - 1].clone(), reset)
                    .map(|staged| land_on(staged, &anchors[segment], reset))
            };

            match staged.and_then(|staged| commit(ledger, staged)) {
                Ok((written, applied)) => {
                    tracing::debug!(segment, written, applied, "bidirectional segment committed");
                    outcome.applied += applied;
                    outcome.validated += update_count;
                    if !self.preserve_pending {
                        for date in &dates {
                            self.pending.remove(date);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(segment, updates = update_count, error = %err, "bidirectional segment rejected");
                    outcome.conflicts += update_count;
                    outcome.failures.push(err);
                }
            }
        }

        tracing::info!(
            applied = outcome.applied,
            conflicts = outcome.conflicts,
            "bidirectional timeline built"
        );
        Ok(outcome)
    }

    /// Audit pending dates against `ledger` without mutating it.
    ///
    /// A pending date is reflected when the ledger holds an entry exactly at
    /// it carrying every touched new value, and the preceding entry (if any)
    /// carries every delta's old value. Reflected dates are dropped from the
    /// builder; contradicted ones stay pending.
    pub fn remove_historical_delta_version_artifacts(
        &mut self,
        ledger: &Ledger<D, R, M>,
    ) -> ArtifactReport<D> {
        let mut report = ArtifactReport::default();
        for (date, group) in &self.pending {
            let Some(current) = ledger.dataset_ledger().get(date) else {
                continue;
            };
            let previous = ledger.version_before(date);
            let reflected = group.iter().all(|update| {
                update.touched_fields().all(|field| {
                    let new_matches = update.new_values().field_eq(current.record(), field);
                    let old_matches = match (update.tag(field), update.old_values(), previous) {
                        (FieldPatch::DeltaChange, Some(old), Some(previous)) => {
                            old.field_eq(previous.record(), field)
                        }
                        _ => true,
                    };
                    new_matches && old_matches
                })
            });
            if reflected {
                report.existing_dates.push(date.clone());
            } else {
                report.mismatched_dates.push(date.clone());
            }
        }

        for date in &report.existing_dates {
            self.pending.remove(date);
        }
        report
    }

    /// Record at `date` if the pending updates were applied on top of `ledger`,
    /// without validation. `None` when `date` precedes the ledger.
    #[must_use]
    pub fn preview_at(&self, ledger: &Ledger<D, R, M>, date: &D) -> Option<R> {
        let (base_date, base) = ledger.entry_at(date)?;
        let mut record = base.record().clone();
        for (_, group) in self.pending.range(base_date..=date).filter(|(pending, _)| *pending > base_date) {
            for update in group {
                record = update.project(&record);
            }
        }
        Some(record)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of queued updates across all dates.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn pending_dates(&self) -> Vec<D> {
        self.pending.keys().cloned().collect()
    }

    #[must_use]
    pub fn pending_at(&self, date: &D) -> &[PartialUpdate<R, M>] {
        self.pending.get(date).map(Vec::as_slice).unwrap_or_default()
    }

    fn consume_all(&mut self) {
        if !self.preserve_pending {
            self.pending.clear();
        }
    }
}

fn ordering_violation<D: LedgerDate>(
    anchor: &'static str,
    anchor_date: &D,
    relation: &'static str,
    pending_date: &D,
) -> TimelineError {
    TimelineError::OrderingViolation {
        anchor,
        anchor_date: anchor_date.to_string(),
        relation,
        pending_date: pending_date.to_string(),
    }
}

/// Apply date-groups in ascending order; one staged entry per date holding the
/// state after that date's updates.
fn forward_walk<'a, D, R, M, I>(groups: I, seed: R, reset: &M) -> Result<Vec<Staged<D, R, M>>, TimelineError>
where
    D: LedgerDate + 'a,
    R: Record + 'a,
    M: MetaData + 'a,
    I: Iterator<Item = (&'a D, &'a Vec<PartialUpdate<R, M>>)>,
{
    let mut running = seed;
    let mut processed = FieldMask::new(R::FIELD_COUNT);
    let mut staged = Vec::new();
    for (date, group) in groups {
        processed.reset();
        let mut label = reset.clone();
        for update in group {
            label.merge(update.metadata());
            update.apply_forward(date, &mut running, &mut processed, Validation::Strict)?;
        }
        staged.push(Staged {
            date: date.clone(),
            dataset: DataSet::with_metadata(running.clone(), label),
            updates: group.len(),
        });
    }
    Ok(staged)
}

/// Undo date-groups in descending order; each date is staged with the state in
/// force at it before its updates are undone. Also returns the state before the
/// earliest date.
fn reverse_walk<'a, D, R, M, I>(
    groups: I,
    seed: R,
    reset: &M,
) -> Result<(Vec<Staged<D, R, M>>, R), TimelineError>
where
    D: LedgerDate + 'a,
    R: Record + 'a,
    M: MetaData + 'a,
    I: DoubleEndedIterator<Item = (&'a D, &'a Vec<PartialUpdate<R, M>>)>,
{
    let mut running = seed;
    let mut processed = FieldMask::new(R::FIELD_COUNT);
    let mut staged = Vec::new();
    for (date, group) in groups.rev() {
        let mut label = reset.clone();
        for update in group {
            label.merge(update.metadata());
        }
        staged.push(Staged {
            date: date.clone(),
            dataset: DataSet::with_metadata(running.clone(), label),
            updates: group.len(),
        });
        processed.reset();
        for update in group {
            update.apply_backward(date, &mut running, &mut processed)?;
        }
    }
    Ok((staged, running))
}

/// Stage `anchor` with the final state of a forward walk, so the commit
/// checks the walk lands on the record already held there.
fn land_on<D: LedgerDate, R: Record, M: MetaData>(
    mut staged: Vec<Staged<D, R, M>>,
    anchor: &D,
    reset: &M,
) -> Vec<Staged<D, R, M>> {
    let landing = match staged.last() {
        Some(last) if last.date != *anchor => Some(last.dataset.record().clone()),
        _ => None,
    };
    if let Some(record) = landing {
        staged.push(Staged {
            date: anchor.clone(),
            dataset: DataSet::with_metadata(record, reset.clone()),
            updates: 0,
        });
    }
    staged
}

/// Check every staged entry against the ledger, then insert them all.
/// Returns entries written and the updates behind those entries.
fn commit<D: LedgerDate, R: Record, M: MetaData>(
    ledger: &mut Ledger<D, R, M>,
    staged: Vec<Staged<D, R, M>>,
) -> Result<(usize, usize), TimelineError> {
    for entry in &staged {
        ledger.check_version(&entry.date, &entry.dataset)?;
    }

    let mut written = 0;
    let mut applied = 0;
    for entry in staged {
        let date = entry.date.clone();
        if ledger.insert_version(entry.date, entry.dataset)? {
            tracing::debug!(date = %date, updates = entry.updates, "ledger entry flushed");
            written += 1;
            applied += entry.updates;
        }
    }
    Ok((written, applied))
}
