use serde::Deserialize;

use crate::error::EngineError;
use crate::model::col;

// ---------------------------------------------------------------------------
// Column / cell references
// ---------------------------------------------------------------------------

/// Zero-based column index, written as a letter ("A", "AH") in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Col(pub usize);

impl TryFrom<String> for Col {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_col_letter(&value)
            .map(Col)
            .ok_or_else(|| format!("invalid column letter: {value:?}"))
    }
}

/// Zero-based (row, col), written as an A1-style reference ("C39").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl TryFrom<String> for CellRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_cell_ref(&value).ok_or_else(|| format!("invalid cell reference: {value:?}"))
    }
}

fn parse_col_letter(s: &str) -> Option<usize> {
    let s = s.trim();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut result = 0usize;
    for c in s.chars() {
        result = result * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(result - 1)
}

fn parse_cell_ref(s: &str) -> Option<CellRef> {
    let s = s.trim();
    let split = s.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = s.split_at(split);
    let col = parse_col_letter(letters)?;
    let row: usize = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some(CellRef { row: row - 1, col })
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RunConfig {
    pub name: String,
    pub ledger: LedgerConfig,
    pub sources: SourcesConfig,
    pub services: ServicesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Deserialize)]
pub struct LedgerConfig {
    pub file: String,
    #[serde(default = "default_ledger_sheet")]
    pub sheet: String,
    /// 1-based first data row; rows above are the header region.
    #[serde(default = "default_data_start_row")]
    pub data_start_row: usize,
    #[serde(default = "default_summary_sheet")]
    pub summary_sheet: String,
    #[serde(default = "default_control_cell")]
    pub control_cell: CellRef,
    /// Marker cell on the summary sheet that makes the percent rescale
    /// idempotent across re-runs.
    #[serde(default = "default_marker_cell")]
    pub rescale_marker_cell: CellRef,
}

impl LedgerConfig {
    /// Zero-based first data row.
    pub fn data_start(&self) -> usize {
        self.data_start_row.saturating_sub(1)
    }
}

fn default_ledger_sheet() -> String {
    "Ledger".into()
}
fn default_data_start_row() -> usize {
    3
}
fn default_summary_sheet() -> String {
    "Summary".into()
}
fn default_control_cell() -> CellRef {
    CellRef { row: 38, col: 2 } // C39
}
fn default_marker_cell() -> CellRef {
    CellRef { row: 0, col: 25 } // Z1
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SourcesConfig {
    pub registry: RegistrySource,
    pub portfolio: PortfolioSource,
    pub credit: CreditSource,
    pub working: WorkingSource,
    pub property_list: ListSource,
    pub categories: CategorySource,
    pub sale_listing: TierSource,
    /// May be absent month to month; "no data available", not an error.
    #[serde(default)]
    pub recovery: Option<TierSource>,
    pub prior_working: TierSource,
}

fn default_skip_rows() -> usize {
    1
}

/// The disbursement register the ledger is seeded from.
#[derive(Debug, Deserialize)]
pub struct RegistrySource {
    pub file: String,
    #[serde(default = "registry_key")]
    pub key_column: Col,
    #[serde(default = "registry_amount")]
    pub amount_column: Col,
    #[serde(default = "registry_rate")]
    pub rate_column: Col,
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
}

fn registry_key() -> Col {
    Col(0) // A
}
fn registry_amount() -> Col {
    Col(7) // H
}
fn registry_rate() -> Col {
    Col(28) // AC
}

#[derive(Debug, Deserialize)]
pub struct PortfolioSource {
    pub file: String,
    #[serde(default = "portfolio_key")]
    pub key_column: Col,
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
    #[serde(default)]
    pub columns: PortfolioColumns,
}

fn portfolio_key() -> Col {
    Col(4) // E
}

#[derive(Debug, Deserialize)]
pub struct PortfolioColumns {
    pub client_code: Col,
    pub equipment: Col,
    pub purpose: Col,
    pub frequency: Col,
    pub period: Col,
    pub contract_rate: Col,
    pub contract_amount: Col,
}

impl Default for PortfolioColumns {
    fn default() -> Self {
        Self {
            client_code: Col(2),      // C
            equipment: Col(27),       // AB
            purpose: Col(38),         // AM
            frequency: Col(33),       // AH
            period: Col(5),           // F
            contract_rate: Col(34),   // AI
            contract_amount: Col(7),  // H
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreditSource {
    pub file: String,
    #[serde(default = "credit_key")]
    pub key_column: Col,
    #[serde(default = "credit_class")]
    pub class_column: Col,
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
}

fn credit_key() -> Col {
    Col(2) // C
}
fn credit_class() -> Col {
    Col(6) // G
}

#[derive(Debug, Deserialize)]
pub struct WorkingSource {
    pub file: String,
    #[serde(default = "working_key")]
    pub key_column: Col,
    #[serde(default = "working_exposure")]
    pub exposure_column: Col,
    #[serde(default = "working_risk")]
    pub risk_column: Col,
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
}

fn working_key() -> Col {
    Col(0) // A
}
fn working_exposure() -> Col {
    Col(27) // AB
}
fn working_risk() -> Col {
    Col(29) // AD
}

/// A one-column membership list (e.g. mortgaged-property contracts).
#[derive(Debug, Deserialize)]
pub struct ListSource {
    pub file: String,
    #[serde(default = "list_key")]
    pub key_column: Col,
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
}

fn list_key() -> Col {
    Col(0) // A
}

/// The classification master: special categories, composite lookup,
/// vehicle risk categories, equipment fallback.
#[derive(Debug, Deserialize)]
pub struct CategorySource {
    pub file: String,
    #[serde(default = "cat_special_key")]
    pub special_key_column: Col,
    #[serde(default = "cat_special_label")]
    pub special_label_column: Col,
    #[serde(default = "cat_composite_key")]
    pub composite_key_column: Col,
    #[serde(default = "cat_composite_label")]
    pub composite_label_column: Col,
    #[serde(default = "cat_vehicle")]
    pub vehicle_column: Col,
    #[serde(default = "cat_equipment_key")]
    pub equipment_key_column: Col,
    #[serde(default = "cat_equipment_label")]
    pub equipment_label_column: Col,
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
}

fn cat_special_key() -> Col {
    Col(11) // L
}
fn cat_special_label() -> Col {
    Col(12) // M
}
fn cat_composite_key() -> Col {
    Col(5) // F
}
fn cat_composite_label() -> Col {
    Col(4) // E
}
fn cat_vehicle() -> Col {
    Col(15) // P
}
fn cat_equipment_key() -> Col {
    Col(17) // R
}
fn cat_equipment_label() -> Col {
    Col(18) // S
}

/// One tier of the valuation lookup: a key column and one value column.
#[derive(Debug, Deserialize)]
pub struct TierSource {
    pub file: String,
    pub key_column: Col,
    pub value_column: Col,
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
}

// ---------------------------------------------------------------------------
// Services / retry / validation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ServicesConfig {
    /// Pass A: fills core contract fields.
    pub fields: ServiceConfig,
    /// Pass B: last-resort valuation lookups.
    pub valuation: ServiceConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize)]
pub struct ValidationConfig {
    /// Minimum-rate reference as a decimal fraction (0.06 = 6%).
    #[serde(default)]
    pub reference_rate: Option<f64>,
    /// Optional reference-rate file; its first numeric cell wins over
    /// `reference_rate`. Soft dependency.
    #[serde(default)]
    pub reference_file: Option<String>,
    /// Ledger fields excluded from the blank sweep.
    #[serde(default = "default_excluded_columns")]
    pub excluded_columns: Vec<String>,
    /// Ledger fields rescaled from raw percentages to fractions.
    #[serde(default = "default_percent_columns")]
    pub percent_columns: Vec<String>,
    #[serde(default = "default_report_file")]
    pub report_file: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            reference_rate: None,
            reference_file: None,
            excluded_columns: default_excluded_columns(),
            percent_columns: default_percent_columns(),
            report_file: default_report_file(),
        }
    }
}

fn default_excluded_columns() -> Vec<String> {
    vec!["valuation".into(), "weighted_ltv_pct".into()]
}

fn default_percent_columns() -> Vec<String> {
    vec!["ltv_pct".into(), "weighted_ltv_pct".into()]
}

fn default_report_file() -> String {
    "EXCEPTIONS.xlsx".into()
}

/// Fallback when neither the reference file nor the config supplies a rate.
pub const DEFAULT_REFERENCE_RATE: f64 = 0.06;

impl ValidationConfig {
    pub fn excluded_cols(&self) -> Vec<usize> {
        self.excluded_columns
            .iter()
            .filter_map(|n| col::by_name(n))
            .collect()
    }

    pub fn percent_cols(&self) -> Vec<usize> {
        self.percent_columns
            .iter()
            .filter_map(|n| col::by_name(n))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Parse + validate
// ---------------------------------------------------------------------------

impl RunConfig {
    pub fn from_toml(input: &str) -> Result<Self, EngineError> {
        let config: RunConfig =
            toml::from_str(input).map_err(|e| EngineError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.ledger.data_start_row < 2 {
            return Err(EngineError::ConfigValidation(format!(
                "ledger.data_start_row must leave a header region (got {})",
                self.ledger.data_start_row
            )));
        }

        for (section, file) in [
            ("sources.registry", &self.sources.registry.file),
            ("sources.portfolio", &self.sources.portfolio.file),
            ("sources.credit", &self.sources.credit.file),
            ("sources.working", &self.sources.working.file),
            ("sources.property_list", &self.sources.property_list.file),
            ("sources.categories", &self.sources.categories.file),
            ("sources.sale_listing", &self.sources.sale_listing.file),
            ("sources.prior_working", &self.sources.prior_working.file),
        ] {
            if file.trim().is_empty() {
                return Err(EngineError::ConfigValidation(format!(
                    "{section}.file must not be empty"
                )));
            }
        }

        for name in &self.validation.excluded_columns {
            if col::by_name(name).is_none() {
                return Err(EngineError::ConfigValidation(format!(
                    "validation.excluded_columns: unknown field {name:?}"
                )));
            }
        }
        for name in &self.validation.percent_columns {
            if col::by_name(name).is_none() {
                return Err(EngineError::ConfigValidation(format!(
                    "validation.percent_columns: unknown field {name:?}"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::ConfigValidation(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
