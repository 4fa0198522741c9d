use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::record::check_field;
use crate::render::{CsvOptions, DELTA_ARROW};
use crate::{BuildDirection, FieldMask, FieldPatch, MetaData, Record, TimelineError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UpdateShape {
    /// Old and new values for every touched position.
    Changes,
    /// New values only; forward builds only.
    Snapshot,
}

impl UpdateShape {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Changes => "changes",
            Self::Snapshot => "snapshot",
        }
    }
}

/// Whether [`PartialUpdate::apply_forward`] checks recorded old values and
/// double modification before writing.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Validation {
    Strict,
    /// Skips all checks; only for reads over a ledger that was already validated.
    Trusted,
}

/// Field-level update bound to one build direction.
#[derive(Debug, Clone)]
pub struct PartialUpdate<R, M = ()> {
    tags: Vec<FieldPatch>,
    new_values: R,
    old_values: Option<R>,
    direction: BuildDirection,
    metadata: M,
}

impl<R: Record, M: MetaData> PartialUpdate<R, M> {
    /// Delta update touching every position where `old` and `new` differ.
    #[must_use]
    pub fn changes(direction: BuildDirection, old: R, new: R) -> Self {
        let tags = (0..R::FIELD_COUNT)
            .map(|field| {
                if old.field_eq(&new, field) {
                    FieldPatch::FullRecord
                } else {
                    FieldPatch::DeltaChange
                }
            })
            .collect();
        Self { tags, new_values: new, old_values: Some(old), direction, metadata: M::default() }
    }

    /// Delta update touching exactly `fields`, even where old and new agree.
    ///
    /// # Errors
    /// Returns [`TimelineError::FieldOutOfRange`] for a position outside the schema.
    pub fn changes_on(
        direction: BuildDirection,
        old: R,
        new: R,
        fields: &[usize],
    ) -> Result<Self, TimelineError> {
        let tags = tags_for::<R>(fields, FieldPatch::DeltaChange)?;
        Ok(Self { tags, new_values: new, old_values: Some(old), direction, metadata: M::default() })
    }

    /// Snapshot asserting `values` at `fields`; always forward.
    ///
    /// # Errors
    /// Returns [`TimelineError::FieldOutOfRange`] for a position outside the schema.
    pub fn snapshot(values: R, fields: &[usize]) -> Result<Self, TimelineError> {
        let tags = tags_for::<R>(fields, FieldPatch::Snapshot)?;
        Ok(Self {
            tags,
            new_values: values,
            old_values: None,
            direction: BuildDirection::Forward,
            metadata: M::default(),
        })
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: M) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn shape(&self) -> UpdateShape {
        if self.old_values.is_some() {
            UpdateShape::Changes
        } else {
            UpdateShape::Snapshot
        }
    }

    #[must_use]
    pub fn direction(&self) -> BuildDirection {
        self.direction
    }

    #[must_use]
    pub fn tags(&self) -> &[FieldPatch] {
        &self.tags
    }

    #[must_use]
    pub fn tag(&self, field: usize) -> FieldPatch {
        self.tags.get(field).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn new_values(&self) -> &R {
        &self.new_values
    }

    #[must_use]
    pub fn old_values(&self) -> Option<&R> {
        self.old_values.as_ref()
    }

    #[must_use]
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    #[must_use]
    pub fn touches(&self, field: usize) -> bool {
        self.tag(field).is_touched()
    }

    pub fn touched_fields(&self) -> impl Iterator<Item = usize> + '_ {
        self.tags.iter().enumerate().filter(|(_, tag)| tag.is_touched()).map(|(field, _)| field)
    }

    #[must_use]
    pub fn touched_count(&self) -> usize {
        self.touched_fields().count()
    }

    /// Both updates touch `field` and assert the same value there (and the same
    /// prior value when both are deltas).
    #[must_use]
    pub fn field_agrees(&self, other: &Self, field: usize) -> bool {
        if !self.touches(field) || !other.touches(field) {
            return false;
        }
        if !self.new_values.field_eq(&other.new_values, field) {
            return false;
        }
        match (self.delta_old(field), other.delta_old(field)) {
            (Some(lhs), Some(rhs)) => lhs.field_eq(rhs, field),
            _ => true,
        }
    }

    /// Same shape, direction, coverage and values; metadata is ignored.
    #[must_use]
    pub fn is_value_identical(&self, other: &Self) -> bool {
        self.shape() == other.shape()
            && self.direction == other.direction
            && self.tags == other.tags
            && self.touched_fields().all(|field| self.field_agrees(other, field))
    }

    /// Copy of this update with every position outside `fields` untouched.
    #[must_use]
    pub fn restricted_to(&self, fields: &[usize]) -> Self {
        let mut restricted = self.clone();
        for (field, tag) in restricted.tags.iter_mut().enumerate() {
            if !fields.contains(&field) {
                *tag = FieldPatch::FullRecord;
            }
        }
        restricted
    }

    /// Fill positions this update leaves untouched from a compatible `other`.
    ///
    /// Positions both touch must agree; they are left as they are. Returns the
    /// number of positions filled.
    ///
    /// # Errors
    /// Returns [`TimelineError::DirectionMismatch`] when directions differ,
    /// [`TimelineError::InvalidUpdate`] when shapes differ, and
    /// [`TimelineError::DoubleModification`] when a shared position disagrees.
    pub fn merge_from<D: Display>(&mut self, other: &Self, date: &D) -> Result<usize, TimelineError> {
        if self.direction != other.direction {
            return Err(TimelineError::DirectionMismatch {
                date: date.to_string(),
                reason: format!(
                    "cannot merge a {} update into a {} update",
                    other.direction, self.direction
                ),
            });
        }
        if self.shape() != other.shape() {
            return Err(TimelineError::InvalidUpdate(format!(
                "cannot merge a {} update into a {} update at {date}",
                other.shape().as_str(),
                self.shape().as_str()
            )));
        }

        for field in other.touched_fields() {
            if self.touches(field) && !self.field_agrees(other, field) {
                return Err(TimelineError::DoubleModification {
                    date: date.to_string(),
                    field,
                    field_name: R::field_name(field),
                });
            }
        }

        let mut filled = 0;
        for field in other.touched_fields() {
            if self.touches(field) {
                continue;
            }
            self.new_values.copy_field_from(&other.new_values, field);
            if let (Some(old), Some(other_old)) = (self.old_values.as_mut(), other.old_values.as_ref())
            {
                old.copy_field_from(other_old, field);
            }
            self.tags[field] = other.tags[field];
            filled += 1;
        }
        self.metadata.merge(&other.metadata);
        Ok(filled)
    }

    /// Apply this update walking time forward: deltas check their old value,
    /// then every touched position takes its new value.
    ///
    /// All checks run before the first write, so a failed call leaves `running`
    /// and `processed` untouched. Returns the number of positions written.
    ///
    /// # Errors
    /// Returns [`TimelineError::DoubleModification`] or [`TimelineError::StaleBase`]
    /// under [`Validation::Strict`].
    pub fn apply_forward<D: Display>(
        &self,
        date: &D,
        running: &mut R,
        processed: &mut FieldMask,
        validation: Validation,
    ) -> Result<usize, TimelineError> {
        if validation == Validation::Strict {
            for field in self.touched_fields() {
                check_unprocessed::<R, D>(processed, field, date)?;
                if let Some(old) = self.delta_old(field) {
                    check_base(old, running, field, date)?;
                }
            }
        }

        let mut written = 0;
        for field in self.touched_fields() {
            running.copy_field_from(&self.new_values, field);
            processed.set(field);
            written += 1;
        }
        Ok(written)
    }

    /// Undo this update walking time backward: each delta checks the running
    /// value equals its new value, then restores the old value.
    ///
    /// # Errors
    /// Returns [`TimelineError::DirectionMismatch`] for snapshot positions,
    /// which have no prior value, plus the forward checks mirrored.
    pub fn apply_backward<D: Display>(
        &self,
        date: &D,
        running: &mut R,
        processed: &mut FieldMask,
    ) -> Result<usize, TimelineError> {
        let Some(old) = self.old_values.as_ref() else {
            return Err(TimelineError::DirectionMismatch {
                date: date.to_string(),
                reason: "snapshot updates have no prior value and apply forward only".to_string(),
            });
        };

        for field in self.touched_fields() {
            if self.tag(field) == FieldPatch::Snapshot {
                return Err(TimelineError::DirectionMismatch {
                    date: date.to_string(),
                    reason: format!(
                        "field {field} ({}) is a snapshot and cannot be undone",
                        R::field_name(field)
                    ),
                });
            }
            check_unprocessed::<R, D>(processed, field, date)?;
            check_base(&self.new_values, running, field, date)?;
        }

        let mut written = 0;
        for field in self.touched_fields() {
            running.copy_field_from(old, field);
            processed.set(field);
            written += 1;
        }
        Ok(written)
    }

    /// Forward application with no checks, for reads over trusted data.
    #[must_use]
    pub fn project(&self, base: &R) -> R {
        let mut projected = base.clone();
        for field in self.touched_fields() {
            projected.copy_field_from(&self.new_values, field);
        }
        projected
    }

    /// Row body after the date column: `[FORWARD]`/`[REVERSE]` marker when
    /// requested, optional metadata, then fields with deltas as `old->new`.
    #[must_use]
    pub fn render_row(&self, options: &CsvOptions) -> String {
        let mut row = String::new();
        if options.markers {
            row.push_str(self.direction.marker());
            row.push(options.delimiter);
        }
        if options.include_metadata {
            if let Some(label) = self.metadata.render() {
                row.push_str(&label);
                row.push(options.delimiter);
            }
        }
        for field in 0..R::FIELD_COUNT {
            if field > 0 {
                row.push(options.delimiter);
            }
            if let Some(old) = self.delta_old(field) {
                row.push_str(&old.field_text(field));
                row.push_str(DELTA_ARROW);
            }
            row.push_str(&self.new_values.field_text(field));
        }
        row
    }

    fn delta_old(&self, field: usize) -> Option<&R> {
        if self.tag(field) == FieldPatch::DeltaChange {
            self.old_values.as_ref()
        } else {
            None
        }
    }
}

fn tags_for<R: Record>(fields: &[usize], tag: FieldPatch) -> Result<Vec<FieldPatch>, TimelineError> {
    let mut tags = vec![FieldPatch::FullRecord; R::FIELD_COUNT];
    for &field in fields {
        check_field::<R>(field)?;
        tags[field] = tag;
    }
    Ok(tags)
}

fn check_unprocessed<R: Record, D: Display>(
    processed: &FieldMask,
    field: usize,
    date: &D,
) -> Result<(), TimelineError> {
    if processed.is_set(field) {
        return Err(TimelineError::DoubleModification {
            date: date.to_string(),
            field,
            field_name: R::field_name(field),
        });
    }
    Ok(())
}

fn check_base<R: Record, D: Display>(
    expected: &R,
    running: &R,
    field: usize,
    date: &D,
) -> Result<(), TimelineError> {
    if expected.field_eq(running, field) {
        return Ok(());
    }
    Err(TimelineError::StaleBase {
        date: date.to_string(),
        field,
        field_name: R::field_name(field),
        expected: expected.field_text(field),
        found: running.field_text(field),
    })
}

/// Text-driven construction of a [`PartialUpdate`], for loaders that only see
/// field names and rendered values.
#[derive(Debug, Clone)]
pub struct UpdateDraft<R> {
    shape: UpdateShape,
    direction: BuildDirection,
    fields: Vec<usize>,
    old_values: R,
    new_values: R,
}

impl<R: Record + Default> UpdateDraft<R> {
    #[must_use]
    pub fn changes(direction: BuildDirection) -> Self {
        Self {
            shape: UpdateShape::Changes,
            direction,
            fields: Vec::new(),
            old_values: R::default(),
            new_values: R::default(),
        }
    }

    #[must_use]
    pub fn snapshot() -> Self {
        Self {
            shape: UpdateShape::Snapshot,
            direction: BuildDirection::Forward,
            fields: Vec::new(),
            old_values: R::default(),
            new_values: R::default(),
        }
    }

    /// Touch `name`. Changes drafts require `old`; snapshot drafts reject it.
    ///
    /// # Errors
    /// Returns [`TimelineError::InvalidUpdate`] for unknown names, repeated
    /// names, or an `old` value that does not fit the draft's shape, and
    /// [`TimelineError::FieldParse`] for unparsable text.
    pub fn touch(&mut self, name: &str, old: Option<&str>, new: &str) -> Result<&mut Self, TimelineError> {
        let Some(field) = R::field_index(name) else {
            return Err(TimelineError::InvalidUpdate(format!("unknown field `{name}`")));
        };
        if self.fields.contains(&field) {
            return Err(TimelineError::InvalidUpdate(format!("field `{name}` listed twice")));
        }

        match (self.shape, old) {
            (UpdateShape::Changes, Some(old)) => self.old_values.set_field_text(field, old)?,
            (UpdateShape::Changes, None) => {
                return Err(TimelineError::InvalidUpdate(format!(
                    "delta change on `{name}` requires an old value"
                )));
            }
            (UpdateShape::Snapshot, Some(_)) => {
                return Err(TimelineError::InvalidUpdate(format!(
                    "snapshot on `{name}` cannot carry an old value"
                )));
            }
            (UpdateShape::Snapshot, None) => {}
        }
        self.new_values.set_field_text(field, new)?;
        self.fields.push(field);
        Ok(self)
    }

    /// # Errors
    /// Returns [`TimelineError::InvalidUpdate`] when nothing was touched.
    pub fn finish<M: MetaData>(self, metadata: M) -> Result<PartialUpdate<R, M>, TimelineError> {
        if self.fields.is_empty() {
            return Err(TimelineError::InvalidUpdate("update touches no fields".to_string()));
        }
        let update = match self.shape {
            UpdateShape::Changes => PartialUpdate::changes_on(
                self.direction,
                self.old_values,
                self.new_values,
                &self.fields,
            )?,
            UpdateShape::Snapshot => PartialUpdate::snapshot(self.new_values, &self.fields)?,
        };
        Ok(update.with_metadata(metadata))
    }
}
