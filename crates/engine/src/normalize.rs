//! Contract-identifier normalization for cross-source matching.
//!
//! Sources disagree on casing, whitespace, separators, numeric formatting
//! (`12345.0` vs `12345`) and zero padding. `normalize` produces the
//! canonical form, `zero_stripped` the secondary alias; every lookup probes
//! both before declaring "not found".

use ledgerforge_store::CellValue;

/// Numeric placeholder some upstream extracts emit for "no identifier".
pub const NO_ID_SENTINEL: f64 = 65535.0;

/// Canonicalize a raw identifier: uppercase, trim, strip every
/// non-alphanumeric character; an integer-valued float collapses to its
/// integer digits first. Returns `None` for the no-identifier sentinel and
/// for inputs with nothing left after stripping.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Collapse numeric forms before stripping, or `12345.0` would read as
    // `123450` once the dot is removed.
    let collapsed = match trimmed.parse::<f64>() {
        Ok(n) if n == NO_ID_SENTINEL => return None,
        Ok(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", n as i64),
        _ => trimmed.to_string(),
    };

    let cleaned: String = collapsed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn normalize_cell(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Empty => None,
        CellValue::Number(n) if *n == NO_ID_SENTINEL => None,
        _ => normalize(&value.display()),
    }
}

/// Alias key: strip the zero padding at the start of the identifier's digit
/// run. `0012` → `12`, `LR00000049` → `LR49`; an all-zero run keeps one `0`.
pub fn zero_stripped(normalized: &str) -> String {
    let Some(first_digit) = normalized.find(|c: char| c.is_ascii_digit()) else {
        return normalized.to_string();
    };

    let (prefix, digits_on) = normalized.split_at(first_digit);
    let stripped = digits_on.trim_start_matches('0');

    if stripped.is_empty() {
        format!("{prefix}0")
    } else {
        format!("{prefix}{stripped}")
    }
}

/// Parse a usable positive amount. Placeholder markers (`N/A`, `#N/A`,
/// `Not Valued`, `-`), blanks, zeros and negatives all mean "no data".
pub fn valid_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    if matches!(upper.as_str(), "N/A" | "NA" | "#N/A" | "NULL" | "NONE" | "NAN" | "-" | "NOT VALUED") {
        return None;
    }
    let n: f64 = trimmed.replace(',', "").parse().ok()?;
    if n > 0.0 {
        Some(n)
    } else {
        None
    }
}
