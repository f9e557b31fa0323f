//! Enrichment gateway: batches still-incomplete rows against an external
//! service, under a bounded retry budget, merging partial results without
//! clobbering existing data.

use std::collections::HashMap;
use std::thread;

use ledgerforge_enrich::{EnrichmentService, FieldBundle, RetryPolicy};
use ledgerforge_store::Sheet;
use tracing::{info, warn};

use crate::exceptions::ExceptionTracker;
use crate::join::{keyed_rows, KeyedRow};
use crate::model::{col, StageId};

/// Fields a complete row must carry; rows missing any of them are sent to
/// the first enrichment pass. The amount counts as missing when zero.
pub const REQUIRED_FIELDS: [usize; 6] = [
    col::CLIENT_CODE,
    col::EQUIPMENT,
    col::FREQUENCY,
    col::PERIOD,
    col::CONTRACT_RATE,
    col::CONTRACT_AMOUNT,
];

#[derive(Debug, Default)]
pub struct GatewayStats {
    pub attempts: u32,
    pub batched_ids: usize,
    pub unresolved_ids: usize,
}

// ---------------------------------------------------------------------------
// Pass A: core contract fields
// ---------------------------------------------------------------------------

pub fn fill_missing_fields(
    sheet: &mut Sheet,
    data_start: usize,
    service: &dyn EnrichmentService,
    policy: &RetryPolicy,
    tracker: &mut ExceptionTracker,
) -> GatewayStats {
    let stage = StageId::EnrichMissing;

    let missing = |sheet: &Sheet| -> Vec<(String, Vec<usize>)> {
        let mut by_id: Vec<(String, Vec<usize>)> = Vec::new();
        for keyed in keyed_rows(sheet, data_start) {
            if !row_is_incomplete(sheet, keyed.row) {
                continue;
            }
            match by_id.iter_mut().find(|(id, _)| *id == keyed.norm) {
                Some((_, rows)) => rows.push(keyed.row),
                None => by_id.push((keyed.norm.clone(), vec![keyed.row])),
            }
        }
        by_id
    };

    run_retry_loop(sheet, service, policy, tracker, stage, missing, merge_fields)
}

fn row_is_incomplete(sheet: &Sheet, row: usize) -> bool {
    REQUIRED_FIELDS.iter().any(|&field| {
        if field == col::CONTRACT_AMOUNT {
            amount_missing(sheet, row, field)
        } else {
            sheet.is_blank(row, field)
        }
    })
}

fn amount_missing(sheet: &Sheet, row: usize, field: usize) -> bool {
    if sheet.is_blank(row, field) {
        return true;
    }
    matches!(sheet.get(row, field).as_number(), Some(n) if n == 0.0)
}

/// Write a literal number only when the target is blank. A blank cell is
/// never a formula, so formulas survive by construction — mirroring the
/// string-side `Sheet::set_if_blank`.
fn set_number_if_blank(sheet: &mut Sheet, row: usize, col: usize, value: f64) -> bool {
    if !sheet.is_blank(row, col) {
        return false;
    }
    sheet.set_number(row, col, value);
    true
}

fn merge_fields(sheet: &mut Sheet, row: usize, bundle: &FieldBundle) {
    if let Some(ref v) = bundle.client_code {
        sheet.set_if_blank(row, col::CLIENT_CODE, v);
    }
    if let Some(ref v) = bundle.equipment {
        sheet.set_if_blank(row, col::EQUIPMENT, v);
    }
    if let Some(ref v) = bundle.frequency {
        sheet.set_if_blank(row, col::FREQUENCY, v);
    }
    if let Some(v) = bundle.period {
        set_number_if_blank(sheet, row, col::PERIOD, v);
    }
    if let Some(v) = bundle.interest_rate {
        set_number_if_blank(sheet, row, col::CONTRACT_RATE, v);
    }

    // Amount falls back to the facility limit when both sides are blank/zero.
    if amount_missing(sheet, row, col::CONTRACT_AMOUNT) {
        let amount = bundle
            .contract_amount
            .filter(|n| *n > 0.0)
            .or(bundle.limit.filter(|n| *n > 0.0));
        if let Some(n) = amount {
            sheet.set_number_guarded(row, col::CONTRACT_AMOUNT, n);
        }
    }
}

// ---------------------------------------------------------------------------
// Pass B: valuations
// ---------------------------------------------------------------------------

/// Second, independent pass (different service) for rows still missing a
/// valuation after the tiered source joins.
pub fn fill_missing_valuations(
    sheet: &mut Sheet,
    candidates: &[KeyedRow],
    service: &dyn EnrichmentService,
    policy: &RetryPolicy,
    tracker: &mut ExceptionTracker,
) -> GatewayStats {
    let stage = StageId::EnrichValuation;
    let candidates = candidates.to_vec();

    let missing = move |sheet: &Sheet| -> Vec<(String, Vec<usize>)> {
        let mut by_id: Vec<(String, Vec<usize>)> = Vec::new();
        for keyed in &candidates {
            if !amount_missing(sheet, keyed.row, col::VALUATION) {
                continue;
            }
            match by_id.iter_mut().find(|(id, _)| *id == keyed.norm) {
                Some((_, rows)) => rows.push(keyed.row),
                None => by_id.push((keyed.norm.clone(), vec![keyed.row])),
            }
        }
        by_id
    };

    run_retry_loop(sheet, service, policy, tracker, stage, missing, merge_valuation)
}

fn merge_valuation(sheet: &mut Sheet, row: usize, bundle: &FieldBundle) {
    if let Some(v) = bundle.valuation.filter(|n| *n > 0.0) {
        if amount_missing(sheet, row, col::VALUATION) {
            sheet.set_number_guarded(row, col::VALUATION, v);
        }
    }
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

fn run_retry_loop(
    sheet: &mut Sheet,
    service: &dyn EnrichmentService,
    policy: &RetryPolicy,
    tracker: &mut ExceptionTracker,
    stage: StageId,
    missing: impl Fn(&Sheet) -> Vec<(String, Vec<usize>)>,
    merge: impl Fn(&mut Sheet, usize, &FieldBundle),
) -> GatewayStats {
    let mut stats = GatewayStats::default();

    let mut pending = missing(sheet);
    stats.batched_ids = pending.len();
    if pending.is_empty() {
        return stats;
    }

    loop {
        stats.attempts += 1;
        let ids: Vec<String> = pending.iter().map(|(id, _)| id.clone()).collect();
        info!(stage = stage.label(), batch = ids.len(), attempt = stats.attempts, "enrichment call");

        match service.enrich(&ids) {
            Ok(results) => {
                apply_results(sheet, &pending, &results, &merge);
            }
            Err(e) => {
                // A transport failure burns an attempt like a non-resolution.
                warn!(stage = stage.label(), error = %e, "enrichment call failed");
            }
        }

        pending = missing(sheet);
        if pending.is_empty() || !policy.attempts_remaining(stats.attempts) {
            break;
        }
        thread::sleep(policy.delay_for(stats.attempts));
    }

    stats.unresolved_ids = pending.len();
    for (id, _) in &pending {
        tracker.record(
            stage,
            format!("unresolved after {} attempt(s)", stats.attempts),
            Some(id.as_str()),
        );
    }

    stats
}

fn apply_results(
    sheet: &mut Sheet,
    pending: &[(String, Vec<usize>)],
    results: &HashMap<String, FieldBundle>,
    merge: &impl Fn(&mut Sheet, usize, &FieldBundle),
) {
    for (id, rows) in pending {
        if let Some(bundle) = results.get(id) {
            for &row in rows {
                merge(sheet, row, bundle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    use ledgerforge_enrich::EnrichError;

    struct FakeService {
        calls: RefCell<Vec<Vec<String>>>,
        responses: HashMap<String, FieldBundle>,
        fail_always: bool,
    }

    impl FakeService {
        fn resolving(responses: HashMap<String, FieldBundle>) -> Self {
            Self { calls: RefCell::new(Vec::new()), responses, fail_always: false }
        }

        fn broken() -> Self {
            Self { calls: RefCell::new(Vec::new()), responses: HashMap::new(), fail_always: true }
        }
    }

    impl EnrichmentService for FakeService {
        fn enrich(&self, ids: &[String]) -> Result<HashMap<String, FieldBundle>, EnrichError> {
            self.calls.borrow_mut().push(ids.to_vec());
            if self.fail_always {
                return Err(EnrichError::Network("connection refused".into()));
            }
            Ok(ids
                .iter()
                .filter_map(|id| self.responses.get(id).map(|b| (id.clone(), b.clone())))
                .collect())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(0))
    }

    fn incomplete_ledger() -> Sheet {
        let mut sheet = Sheet::new("Ledger");
        sheet.set_value(2, col::CONTRACT_ID, "LR00000001");
        sheet.set_value(2, col::CATEGORY_TAG, "LR");
        sheet.set_value(3, col::CONTRACT_ID, "LR00000002");
        sheet.set_value(3, col::CATEGORY_TAG, "LR");
        sheet
    }

    fn full_bundle() -> FieldBundle {
        FieldBundle {
            client_code: Some("2001".into()),
            equipment: Some("Excavator".into()),
            frequency: Some("M".into()),
            period: Some(36.0),
            interest_rate: Some(14.5),
            contract_amount: Some(125000.0),
            limit: None,
            valuation: None,
        }
    }

    #[test]
    fn unresolvable_id_exhausts_budget_and_is_recorded_once() {
        let mut sheet = incomplete_ledger();
        let service = FakeService::broken();
        let mut tracker = ExceptionTracker::new();

        let stats = fill_missing_fields(&mut sheet, 2, &service, &fast_policy(), &mut tracker);

        assert_eq!(stats.attempts, 3);
        assert_eq!(service.calls.borrow().len(), 3);
        assert_eq!(stats.unresolved_ids, 2);
        let for_id = tracker
            .records()
            .iter()
            .filter(|r| r.contract_id.as_deref() == Some("LR00000001"))
            .count();
        assert_eq!(for_id, 1);
    }

    #[test]
    fn retry_sends_only_still_missing_ids() {
        let mut sheet = incomplete_ledger();
        let mut responses = HashMap::new();
        responses.insert("LR00000001".to_string(), full_bundle());
        let service = FakeService::resolving(responses);
        let mut tracker = ExceptionTracker::new();

        fill_missing_fields(&mut sheet, 2, &service, &fast_policy(), &mut tracker);

        let calls = service.calls.borrow();
        assert_eq!(calls[0], vec!["LR00000001".to_string(), "LR00000002".to_string()]);
        assert_eq!(calls[1], vec!["LR00000002".to_string()]);
        assert_eq!(sheet.get_display(2, col::CLIENT_CODE), "2001");
        assert_eq!(tracker.count_for(StageId::EnrichMissing), 1);
    }

    #[test]
    fn merge_fills_blanks_only() {
        let mut sheet = incomplete_ledger();
        sheet.set_value(2, col::CLIENT_CODE, "KEEP");
        let mut responses = HashMap::new();
        responses.insert("LR00000001".to_string(), full_bundle());
        responses.insert("LR00000002".to_string(), full_bundle());
        let service = FakeService::resolving(responses);
        let mut tracker = ExceptionTracker::new();

        fill_missing_fields(&mut sheet, 2, &service, &fast_policy(), &mut tracker);

        assert_eq!(sheet.get_display(2, col::CLIENT_CODE), "KEEP");
        assert_eq!(sheet.get_display(2, col::EQUIPMENT), "Excavator");
        assert!(tracker.is_empty());
    }

    #[test]
    fn amount_falls_back_to_limit() {
        let mut sheet = incomplete_ledger();
        sheet.set_number(2, col::CONTRACT_AMOUNT, 0.0);
        let mut responses = HashMap::new();
        responses.insert(
            "LR00000001".to_string(),
            FieldBundle {
                limit: Some(90000.0),
                ..full_bundle()
            },
        );
        let no_amount = responses.get_mut("LR00000001").unwrap();
        no_amount.contract_amount = None;
        responses.insert("LR00000002".to_string(), full_bundle());
        let service = FakeService::resolving(responses);
        let mut tracker = ExceptionTracker::new();

        fill_missing_fields(&mut sheet, 2, &service, &fast_policy(), &mut tracker);

        assert_eq!(sheet.get(2, col::CONTRACT_AMOUNT).as_number(), Some(90000.0));
    }

    #[test]
    fn valuation_pass_targets_candidates_only() {
        let mut sheet = incomplete_ledger();
        let candidates = vec![KeyedRow {
            row: 2,
            norm: "LR00000001".into(),
            alias: "LR1".into(),
        }];
        let mut responses = HashMap::new();
        responses.insert(
            "LR00000001".to_string(),
            FieldBundle { valuation: Some(480000.0), ..Default::default() },
        );
        let service = FakeService::resolving(responses);
        let mut tracker = ExceptionTracker::new();

        let stats =
            fill_missing_valuations(&mut sheet, &candidates, &service, &fast_policy(), &mut tracker);

        assert_eq!(stats.batched_ids, 1);
        assert_eq!(sheet.get(2, col::VALUATION).as_number(), Some(480000.0));
        assert!(sheet.is_blank(3, col::VALUATION));
        assert!(tracker.is_empty());
    }
}
