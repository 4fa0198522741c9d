//! Reconstruction of an entity's dated history from full records and
//! field-level partial updates.
//!
//! A [`TimelineBuilder`] queues [`PartialUpdate`]s by date and materializes
//! them into a [`Ledger`] walking forward from an earliest full record,
//! backward from a latest one, or both around known anchors. Two ledgers are
//! combined with [`PriorityMerge`].

mod builder;
mod dataset;
mod error;
mod ledger;
mod listing;
mod merge;
mod metadata;
mod patch;
mod record;
pub mod render;
mod update;

pub use builder::{ArtifactReport, BiDirectionalOutcome, TimelineBuilder};
pub use dataset::DataSet;
pub use error::{ErrorKind, TimelineError};
pub use ledger::{Ledger, LedgerDate};
pub use listing::{CompanyListing, ListingDate};
pub use merge::PriorityMerge;
pub use metadata::{MetaData, Provenance};
pub use patch::{BuildDirection, FieldMask, FieldPatch, RECORD_MARKER};
pub use record::{FieldValue, Record};
pub use render::CsvOptions;
pub use update::{PartialUpdate, UpdateDraft, UpdateShape, Validation};
