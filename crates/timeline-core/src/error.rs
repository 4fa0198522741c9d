use serde::{Deserialize, Serialize};

/// Failure raised while validating, applying, building or merging timeline data.
///
/// Dates and field values are carried as rendered text so one error type serves
/// every record schema and date key.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TimelineError {
    #[error("conflict at {date}: ledger holds [{existing}] but [{incoming}] was inserted")]
    Conflict { date: String, existing: String, incoming: String },
    #[error("ordering violation: {anchor} anchor {anchor_date} is not {relation} pending date {pending_date}")]
    OrderingViolation {
        anchor: &'static str,
        anchor_date: String,
        relation: &'static str,
        pending_date: String,
    },
    #[error("double modification at {date}: field {field} ({field_name}) touched twice in one date-group")]
    DoubleModification { date: String, field: usize, field_name: &'static str },
    #[error(
        "stale base at {date}: field {field} ({field_name}) expected `{expected}` but running record holds `{found}`"
    )]
    StaleBase {
        date: String,
        field: usize,
        field_name: &'static str,
        expected: String,
        found: String,
    },
    #[error("direction mismatch at {date}: {reason}")]
    DirectionMismatch { date: String, reason: String },
    #[error("record mismatch at {date}: high priority holds [{high}] but low priority holds [{low}]")]
    RecordMismatch { date: String, high: String, low: String },
    #[error("anchor {date} is not present in the ledger")]
    MissingAnchor { date: String },
    #[error("field position {field} is out of range for a record of {field_count} fields")]
    FieldOutOfRange { field: usize, field_count: usize },
    #[error("field {field} ({field_name}) cannot parse `{text}`: {reason}")]
    FieldParse { field: usize, field_name: &'static str, text: String, reason: String },
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    OrderingViolation,
    DoubleModification,
    StaleBase,
    DirectionMismatch,
    RecordMismatch,
    MissingAnchor,
    FieldOutOfRange,
    FieldParse,
    InvalidUpdate,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::OrderingViolation => "ordering_violation",
            Self::DoubleModification => "double_modification",
            Self::StaleBase => "stale_base",
            Self::DirectionMismatch => "direction_mismatch",
            Self::RecordMismatch => "record_mismatch",
            Self::MissingAnchor => "missing_anchor",
            Self::FieldOutOfRange => "field_out_of_range",
            Self::FieldParse => "field_parse",
            Self::InvalidUpdate => "invalid_update",
        }
    }
}

impl TimelineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::OrderingViolation { .. } => ErrorKind::OrderingViolation,
            Self::DoubleModification { .. } => ErrorKind::DoubleModification,
            Self::StaleBase { .. } => ErrorKind::StaleBase,
            Self::DirectionMismatch { .. } => ErrorKind::DirectionMismatch,
            Self::RecordMismatch { .. } => ErrorKind::RecordMismatch,
            Self::MissingAnchor { .. } => ErrorKind::MissingAnchor,
            Self::FieldOutOfRange { .. } => ErrorKind::FieldOutOfRange,
            Self::FieldParse { .. } => ErrorKind::FieldParse,
            Self::InvalidUpdate(_) => ErrorKind::InvalidUpdate,
        }
    }
}
