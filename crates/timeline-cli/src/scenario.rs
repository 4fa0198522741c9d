use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use timeline_core::{
    BuildDirection, CompanyListing, DataSet, Ledger, ListingDate, Provenance, TimelineBuilder,
    UpdateDraft, UpdateShape,
};

pub type ListingLedger = Ledger<ListingDate, CompanyListing, Provenance>;
pub type ListingBuilder = TimelineBuilder<ListingDate, CompanyListing, Provenance>;

/// One JSON scenario file: full records at anchor dates plus dated partial updates.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub origin: Option<ListingDate>,
    #[serde(default)]
    pub anchors: Vec<AnchorEntry>,
    #[serde(default)]
    pub updates: Vec<UpdateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorEntry {
    pub date: ListingDate,
    pub record: CompanyListing,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEntry {
    pub date: ListingDate,
    #[serde(default = "default_direction")]
    pub direction: BuildDirection,
    #[serde(default = "default_kind")]
    pub kind: UpdateShape,
    pub fields: BTreeMap<String, FieldEntry>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldEntry {
    #[serde(default)]
    pub old: Option<String>,
    pub new: String,
}

fn default_direction() -> BuildDirection {
    BuildDirection::Forward
}

fn default_kind() -> UpdateShape {
    UpdateShape::Changes
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file {}", path.display()))?;
        serde_json::from_str(&body)
            .with_context(|| format!("invalid scenario JSON in {}", path.display()))
    }

    fn source_or<'a>(&'a self, own: Option<&'a String>) -> &'a str {
        own.or(self.source.as_ref()).map_or("unknown", String::as_str)
    }

    /// Anchors sorted by date.
    pub fn sorted_anchors(&self) -> Vec<&AnchorEntry> {
        let mut anchors = self.anchors.iter().collect::<Vec<_>>();
        anchors.sort_by_key(|anchor| anchor.date);
        anchors
    }

    pub fn anchor_dataset(&self, anchor: &AnchorEntry) -> DataSet<CompanyListing, Provenance> {
        DataSet::with_metadata(
            anchor.record.clone(),
            Provenance::new(self.source_or(anchor.source.as_ref()), None),
        )
    }

    /// Queue every update, reporting how many were duplicates.
    pub fn load_builder(&self, builder: &mut ListingBuilder) -> Result<usize> {
        let mut duplicates = 0;
        for (index, entry) in self.updates.iter().enumerate() {
            let mut draft = match entry.kind {
                UpdateShape::Changes => UpdateDraft::<CompanyListing>::changes(entry.direction),
                UpdateShape::Snapshot => {
                    if entry.direction != BuildDirection::Forward {
                        return Err(anyhow!(
                            "update #{index} at {}: snapshot updates MUST use direction forward",
                            entry.date
                        ));
                    }
                    UpdateDraft::<CompanyListing>::snapshot()
                }
            };
            for (name, field) in &entry.fields {
                draft
                    .touch(name, field.old.as_deref(), &field.new)
                    .with_context(|| format!("update #{index} at {}", entry.date))?;
            }
            let provenance =
                Provenance::new(self.source_or(entry.source.as_ref()), Some(entry.direction));
            let update = draft
                .finish(provenance)
                .with_context(|| format!("update #{index} at {}", entry.date))?;

            let queued = match entry.kind {
                UpdateShape::Changes => builder.insert_delta_version(entry.date, update),
                UpdateShape::Snapshot => builder.insert_snapshot_version(entry.date, update),
            }
            .with_context(|| format!("update #{index} at {} rejected", entry.date))?;
            if !queued {
                duplicates += 1;
            }
        }
        tracing::debug!(
            updates = self.updates.len(),
            duplicates,
            pending_dates = builder.pending_dates().len(),
            "scenario updates queued"
        );
        Ok(duplicates)
    }

    /// Ledger holding only the anchors.
    pub fn anchor_ledger(&self) -> Result<ListingLedger> {
        let mut ledger = Ledger::new();
        for anchor in self.sorted_anchors() {
            ledger
                .insert_version(anchor.date, self.anchor_dataset(anchor))
                .with_context(|| format!("anchor at {} conflicts with another anchor", anchor.date))?;
        }
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "source": "nse",
        "anchors": [
            {"date": "2004-05-13", "record": {"symbol": "APPAPER", "name": "Andhra Paper Mills",
             "series": "EQ", "isin": "INE435A01028", "face_value": 10, "market_lot": 1}}
        ],
        "updates": [
            {"date": "21-Jan-2014", "fields": {"symbol": {"old": "APPAPER", "new": "IPAPPM"}}},
            {"date": "21-Jan-2014", "fields": {"symbol": {"old": "APPAPER", "new": "IPAPPM"}}},
            {"date": "2020-01-22", "kind": "snapshot", "source": "bse",
             "fields": {"symbol": {"new": "ANDPAPER"}}}
        ]
    }"#;

    fn scenario() -> Scenario {
        match serde_json::from_str(SCENARIO) {
            Ok(scenario) => scenario,
            Err(err) => panic!("fixture scenario should parse: {err}"),
        }
    }

    #[test]
    fn load_builder_queues_updates_and_counts_duplicates() {
        let scenario = scenario();
        let mut builder = ListingBuilder::new();

        let duplicates = match scenario.load_builder(&mut builder) {
            Ok(duplicates) => duplicates,
            Err(err) => panic!("scenario should load: {err:#}"),
        };

        assert_eq!(duplicates, 1);
        assert_eq!(builder.pending_len(), 2);
        let snapshot_date = match "22-Jan-2020".parse::<ListingDate>() {
            Ok(date) => date,
            Err(err) => panic!("fixture date should parse: {err}"),
        };
        let snapshot = builder.pending_at(&snapshot_date);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].shape(), UpdateShape::Snapshot);
        assert_eq!(snapshot[0].metadata().source, "bse");
    }

    #[test]
    fn anchor_ledger_uses_scenario_source() {
        let ledger = match scenario().anchor_ledger() {
            Ok(ledger) => ledger,
            Err(err) => panic!("anchors should load: {err:#}"),
        };
        let Some((_, first)) = ledger.first() else {
            panic!("anchor ledger should not be empty");
        };
        assert_eq!(first.metadata().source, "nse");
        assert_eq!(first.record().symbol, "APPAPER");
    }

    #[test]
    fn reverse_snapshot_is_rejected_while_loading() {
        let mut scenario = scenario();
        scenario.updates[2].direction = BuildDirection::Reverse;
        let mut builder = ListingBuilder::new();

        match scenario.load_builder(&mut builder) {
            Err(err) => assert!(err.to_string().contains("MUST use direction forward")),
            Ok(_) => panic!("reverse snapshot should be rejected"),
        }
    }
}
