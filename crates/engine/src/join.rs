//! Source joins: lookup-map construction, fill-only-blank application,
//! key-column auto-detection, and the tiered valuation fill.

use std::collections::{HashMap, HashSet};

use ledgerforge_sources::SourceTable;
use ledgerforge_store::Sheet;
use tracing::{debug, info, warn};

use crate::model::col;
use crate::normalize::{normalize, normalize_cell, valid_amount, zero_stripped};

// Tunables for the mis-identified-key-column fallback. The right values are
// undocumented upstream; treat these as knobs, not invariants.
pub const KEY_SCAN_COLS: usize = 20;
pub const KEY_SCAN_SAMPLE: usize = 200;
pub const MIN_RESOLVE_RATE: f64 = 0.10;

// ---------------------------------------------------------------------------
// Keyed ledger rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct KeyedRow {
    pub row: usize,
    pub norm: String,
    pub alias: String,
}

/// Every data row whose key normalizes to something. Rows whose key is the
/// no-identifier sentinel (or blank) are excluded from all joins.
pub fn keyed_rows(sheet: &Sheet, data_start: usize) -> Vec<KeyedRow> {
    let Some(last) = sheet.last_used_row(col::CONTRACT_ID) else {
        return Vec::new();
    };

    (data_start..=last)
        .filter_map(|row| {
            let norm = normalize_cell(sheet.get(row, col::CONTRACT_ID))?;
            let alias = zero_stripped(&norm);
            Some(KeyedRow { row, norm, alias })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Lookup maps
// ---------------------------------------------------------------------------

/// Per-value-column pair of maps: by normalized key and by zero-stripped
/// alias. First occurrence wins within one source.
#[derive(Debug, Default)]
pub struct LookupMap {
    by_key: HashMap<String, String>,
    by_alias: HashMap<String, String>,
}

impl LookupMap {
    pub fn insert(&mut self, norm: &str, value: &str) {
        self.by_key.entry(norm.to_string()).or_insert_with(|| value.to_string());
        self.by_alias
            .entry(zero_stripped(norm))
            .or_insert_with(|| value.to_string());
    }

    /// Probe the normalized key first, then the alias.
    pub fn get(&self, norm: &str, alias: &str) -> Option<&str> {
        self.by_key
            .get(norm)
            .or_else(|| self.by_alias.get(alias))
            .map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Build one lookup map from a source table column pair. Rows whose key
/// normalizes to nothing or whose value is blank are skipped.
pub fn build_map(table: &SourceTable, key_col: usize, value_col: usize, skip_rows: usize) -> LookupMap {
    let mut map = LookupMap::default();
    for row in skip_rows..table.num_rows() {
        let Some(norm) = normalize(table.cell(row, key_col)) else {
            continue;
        };
        let value = table.cell(row, value_col).trim();
        if value.is_empty() {
            continue;
        }
        map.insert(&norm, value);
    }
    map
}

/// Normalized key set of one table column (for overlap scoring).
fn key_set(table: &SourceTable, key_col: usize, skip_rows: usize, limit: usize) -> HashSet<String> {
    (skip_rows..table.num_rows())
        .take(limit)
        .filter_map(|row| normalize(table.cell(row, key_col)))
        .collect()
}

// ---------------------------------------------------------------------------
// Multi-column join with auto-detect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct JoinSpec {
    pub value_col: usize,
    pub target_field: usize,
}

#[derive(Debug, Default)]
pub struct JoinStats {
    pub rows_considered: usize,
    pub rows_matched: usize,
    pub cells_filled: usize,
    pub detected_key_col: Option<usize>,
}

/// Join N source columns into N ledger fields, writing only blank cells.
/// When the assumed key column resolves under [`MIN_RESOLVE_RATE`] of the
/// keyed ledger rows, rescan for the real key column and rebuild.
pub fn apply_join(
    sheet: &mut Sheet,
    data_start: usize,
    table: &SourceTable,
    key_col: usize,
    skip_rows: usize,
    specs: &[JoinSpec],
) -> JoinStats {
    let rows = keyed_rows(sheet, data_start);
    let mut stats = JoinStats {
        rows_considered: rows.len(),
        ..Default::default()
    };
    if rows.is_empty() || table.is_empty() {
        return stats;
    }

    let mut active_key_col = key_col;
    let mut table_keys = key_set(table, active_key_col, skip_rows, usize::MAX);

    let hit_rate = overlap_rate(&rows, &table_keys);
    if hit_rate < MIN_RESOLVE_RATE {
        let ledger_keys: HashSet<String> = rows.iter().map(|r| r.norm.clone()).collect();
        if let Some(detected) = detect_key_column(table, &ledger_keys, skip_rows) {
            if detected != active_key_col {
                warn!(
                    assumed = active_key_col,
                    detected, "assumed key column resolves {:.0}% of rows; rebuilding lookup maps",
                    hit_rate * 100.0
                );
                active_key_col = detected;
                table_keys = key_set(table, active_key_col, skip_rows, usize::MAX);
                stats.detected_key_col = Some(detected);
            }
        }
    }

    let maps: Vec<(JoinSpec, LookupMap)> = specs
        .iter()
        .map(|&spec| (spec, build_map(table, active_key_col, spec.value_col, skip_rows)))
        .collect();

    for keyed in &rows {
        let mut matched = false;
        for (spec, map) in &maps {
            if !sheet.is_blank(keyed.row, spec.target_field) {
                continue;
            }
            if let Some(value) = map.get(&keyed.norm, &keyed.alias) {
                if sheet.set_if_blank(keyed.row, spec.target_field, value) {
                    stats.cells_filled += 1;
                    matched = true;
                }
            }
        }
        if matched || table_keys.contains(&keyed.norm) {
            stats.rows_matched += 1;
        }
    }

    debug!(
        matched = stats.rows_matched,
        filled = stats.cells_filled,
        "join applied"
    );
    stats
}

fn overlap_rate(rows: &[KeyedRow], table_keys: &HashSet<String>) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let hits = rows
        .iter()
        .filter(|r| table_keys.contains(&r.norm) || table_keys.contains(&r.alias))
        .count();
    hits as f64 / rows.len() as f64
}

/// Scan the first [`KEY_SCAN_COLS`] columns of a sample of source rows and
/// pick the column with maximum overlap against the ledger key set.
pub fn detect_key_column(
    table: &SourceTable,
    ledger_keys: &HashSet<String>,
    skip_rows: usize,
) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;

    for candidate in 0..table.num_cols().min(KEY_SCAN_COLS) {
        let keys = key_set(table, candidate, skip_rows, KEY_SCAN_SAMPLE);
        let overlap = keys.iter().filter(|k| ledger_keys.contains(*k)).count();
        if overlap > 0 && best.map(|(_, o)| overlap > o).unwrap_or(true) {
            best = Some((candidate, overlap));
        }
    }

    best.map(|(col, _)| col)
}

// ---------------------------------------------------------------------------
// Tiered fill
// ---------------------------------------------------------------------------

pub struct Tier<'a> {
    pub label: &'a str,
    pub table: &'a SourceTable,
    pub key_col: usize,
    pub value_col: usize,
    pub skip_rows: usize,
}

/// Fill `target_field` for the candidate rows from the first tier that
/// resolves each key to a usable positive amount. A `None` tier is "no data
/// available" and is skipped. Returns the rows still unresolved after all
/// tiers.
pub fn tiered_fill(
    sheet: &mut Sheet,
    candidates: &[KeyedRow],
    target_field: usize,
    tiers: &[Option<Tier<'_>>],
) -> Vec<KeyedRow> {
    let mut remaining: Vec<KeyedRow> = candidates.to_vec();

    for tier in tiers.iter().flatten() {
        if remaining.is_empty() {
            break;
        }
        let map = build_map(tier.table, tier.key_col, tier.value_col, tier.skip_rows);
        let mut still: Vec<KeyedRow> = Vec::new();

        for keyed in remaining {
            let amount = map
                .get(&keyed.norm, &keyed.alias)
                .and_then(valid_amount);
            match amount {
                Some(n) if sheet.set_number_guarded(keyed.row, target_field, n) => {}
                _ => still.push(keyed),
            }
        }

        info!(
            tier = tier.label,
            resolved = candidates.len() - still.len(),
            "valuation tier applied"
        );
        remaining = still;
    }

    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerforge_sources::SourceTable;

    fn table(rows: &[&[&str]]) -> SourceTable {
        SourceTable::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn ledger_with_keys(keys: &[&str]) -> Sheet {
        let mut sheet = Sheet::new("Ledger");
        for (i, key) in keys.iter().enumerate() {
            sheet.set_value(2 + i, col::CONTRACT_ID, key);
        }
        sheet
    }

    #[test]
    fn keyed_rows_exclude_sentinel_and_blank() {
        let mut sheet = ledger_with_keys(&["LR00000049", "65535", "ab-0012  "]);
        sheet.set_value(6, col::EQUIPMENT, "orphan"); // keyless row
        let rows = keyed_rows(&sheet, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].norm, "LR00000049");
        assert_eq!(rows[0].alias, "LR49");
        assert_eq!(rows[1].norm, "AB0012");
        assert_eq!(rows[1].alias, "AB12");
    }

    #[test]
    fn join_fills_blanks_by_key_and_alias() {
        let mut sheet = ledger_with_keys(&["LR00000049", "ab-0012"]);
        let source = table(&[
            &["CONTRACT", "CLIENT"],
            &["LR00000049", "2001"],
            &["AB12", "1044"], // alias form of AB0012
        ]);

        let stats = apply_join(
            &mut sheet,
            2,
            &source,
            0,
            1,
            &[JoinSpec { value_col: 1, target_field: col::CLIENT_CODE }],
        );

        assert_eq!(stats.cells_filled, 2);
        assert_eq!(sheet.get_display(2, col::CLIENT_CODE), "2001");
        assert_eq!(sheet.get_display(3, col::CLIENT_CODE), "1044");
    }

    #[test]
    fn join_never_overwrites() {
        let mut sheet = ledger_with_keys(&["LR00000049"]);
        sheet.set_value(2, col::CLIENT_CODE, "KEEP");
        sheet.set_value(2, col::EQUIPMENT, "=D1");
        let source = table(&[&["k", "v", "w"], &["LR00000049", "2001", "Lathe"]]);

        apply_join(
            &mut sheet,
            2,
            &source,
            0,
            1,
            &[
                JoinSpec { value_col: 1, target_field: col::CLIENT_CODE },
                JoinSpec { value_col: 2, target_field: col::EQUIPMENT },
            ],
        );

        assert_eq!(sheet.get_display(2, col::CLIENT_CODE), "KEEP");
        assert_eq!(sheet.get_display(2, col::EQUIPMENT), "=D1");
    }

    #[test]
    fn auto_detect_recovers_from_wrong_key_column() {
        let mut sheet = ledger_with_keys(&["LR00000001", "LR00000002", "LR00000003"]);
        // Assumed key column 0 holds descriptions; real keys live in column 2.
        let source = table(&[
            &["DESC", "AMT", "CONTRACT"],
            &["excavator", "100", "LR00000001"],
            &["lathe", "200", "LR00000002"],
            &["crane", "300", "LR00000003"],
        ]);

        let stats = apply_join(
            &mut sheet,
            2,
            &source,
            0,
            1,
            &[JoinSpec { value_col: 1, target_field: col::CONTRACT_AMOUNT }],
        );

        assert_eq!(stats.detected_key_col, Some(2));
        assert_eq!(stats.cells_filled, 3);
        assert_eq!(sheet.get_display(2, col::CONTRACT_AMOUNT), "100");
    }

    #[test]
    fn tiered_fill_first_tier_wins() {
        let mut sheet = ledger_with_keys(&["LR00000001", "LR00000002", "LR00000003"]);
        let tier_a = table(&[&["k", "v"], &["LR00000001", "1000"]]);
        let tier_b = table(&[&["k", "v"], &["LR00000001", "9999"], &["LR00000002", "2000"]]);
        let tier_c = table(&[&["k", "v"]]);

        let candidates = keyed_rows(&sheet, 2);
        let remaining = tiered_fill(
            &mut sheet,
            &candidates,
            col::VALUATION,
            &[
                Some(Tier { label: "a", table: &tier_a, key_col: 0, value_col: 1, skip_rows: 1 }),
                Some(Tier { label: "b", table: &tier_b, key_col: 0, value_col: 1, skip_rows: 1 }),
                Some(Tier { label: "c", table: &tier_c, key_col: 0, value_col: 1, skip_rows: 1 }),
            ],
        );

        // Tier A resolves row 1 even though tier B also knows it.
        assert_eq!(sheet.get(2, col::VALUATION).as_number(), Some(1000.0));
        assert_eq!(sheet.get(3, col::VALUATION).as_number(), Some(2000.0));
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].norm, "LR00000003");
    }

    #[test]
    fn tiered_fill_skips_absent_tier_and_placeholder_values() {
        let mut sheet = ledger_with_keys(&["LR00000001"]);
        let tier_a = table(&[&["k", "v"], &["LR00000001", "#N/A"]]);
        let tier_c = table(&[&["k", "v"], &["LR00000001", "5000"]]);

        let candidates = keyed_rows(&sheet, 2);
        let remaining = tiered_fill(
            &mut sheet,
            &candidates,
            col::VALUATION,
            &[
                Some(Tier { label: "a", table: &tier_a, key_col: 0, value_col: 1, skip_rows: 1 }),
                None, // recovery table absent this month
                Some(Tier { label: "c", table: &tier_c, key_col: 0, value_col: 1, skip_rows: 1 }),
            ],
        );

        assert!(remaining.is_empty());
        assert_eq!(sheet.get(2, col::VALUATION).as_number(), Some(5000.0));
    }
}
