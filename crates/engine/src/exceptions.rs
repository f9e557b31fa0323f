//! Append-only anomaly log, rendered into the exception report at the end
//! of every run regardless of outcome.

use chrono::Utc;

use crate::model::StageId;

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionRecord {
    /// Stage label, or a lifecycle tag (`init`, `teardown`) outside the
    /// numbered stages.
    pub stage: String,
    pub message: String,
    pub contract_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Default)]
pub struct ExceptionTracker {
    records: Vec<ExceptionRecord>,
}

pub const REPORT_HEADERS: [&str; 4] = ["stage", "message", "contract_id", "timestamp"];

impl ExceptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: StageId, message: impl Into<String>, contract_id: Option<&str>) {
        self.push(stage.label(), message.into(), contract_id.map(String::from));
    }

    /// Lifecycle records (`init` / `teardown`) and anything assembled from
    /// partial data. Empty pieces are coerced, never dropped.
    pub fn record_raw(&mut self, stage: &str, message: &str, contract_id: Option<String>) {
        let stage = if stage.trim().is_empty() { "unknown" } else { stage };
        let message = if message.trim().is_empty() {
            "(no message)"
        } else {
            message
        };
        let contract_id = contract_id.filter(|id| !id.trim().is_empty());
        self.push(stage, message.to_string(), contract_id);
    }

    fn push(&mut self, stage: &str, message: String, contract_id: Option<String>) {
        self.records.push(ExceptionRecord {
            stage: stage.to_string(),
            message,
            contract_id,
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ExceptionRecord] {
        &self.records
    }

    pub fn count_for(&self, stage: StageId) -> usize {
        self.records.iter().filter(|r| r.stage == stage.label()).count()
    }

    /// Flat rows for the report writer, insertion order preserved.
    pub fn report_rows(&self) -> Vec<Vec<String>> {
        self.records
            .iter()
            .map(|r| {
                vec![
                    r.stage.clone(),
                    r.message.clone(),
                    r.contract_id.clone().unwrap_or_default(),
                    r.timestamp.clone(),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_only_in_order() {
        let mut tracker = ExceptionTracker::new();
        tracker.record(StageId::BlankSweep, "blank equipment cell", Some("LR00000049"));
        tracker.record(StageId::ControlTotal, "control total is 137", None);

        let rows = tracker.report_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "blank_sweep");
        assert_eq!(rows[0][2], "LR00000049");
        assert_eq!(rows[1][0], "control_total");
        assert_eq!(rows[1][2], "");
    }

    #[test]
    fn malformed_pieces_are_coerced() {
        let mut tracker = ExceptionTracker::new();
        tracker.record_raw("", "", Some("  ".into()));
        let record = &tracker.records()[0];
        assert_eq!(record.stage, "unknown");
        assert_eq!(record.message, "(no message)");
        assert_eq!(record.contract_id, None);
        assert!(!record.timestamp.is_empty());
    }
}
