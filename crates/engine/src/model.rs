// ---------------------------------------------------------------------------
// Ledger layout
// ---------------------------------------------------------------------------

/// Column positions of the ledger sheet. The key column is 0; the rest are
/// the business fields every stage reads and writes.
pub mod col {
    pub const CONTRACT_ID: usize = 0;
    pub const CATEGORY_TAG: usize = 1;
    pub const CLIENT_CODE: usize = 2;
    pub const EQUIPMENT: usize = 3;
    pub const PURPOSE: usize = 4;
    pub const CLIENT_CLASS: usize = 5;
    pub const LOAN_TYPE: usize = 6;
    pub const FREQUENCY: usize = 7;
    pub const PERIOD: usize = 8;
    pub const TENURE_MONTHS: usize = 9;
    pub const RATE_FLOOR: usize = 10;
    pub const CONTRACT_RATE: usize = 11;
    pub const BASE_RATE: usize = 12;
    pub const DISBURSED_AMOUNT: usize = 13;
    pub const CONTRACT_AMOUNT: usize = 14;
    pub const ANNUAL_COST: usize = 15;
    pub const EFFECTIVE_RATE: usize = 16;
    pub const GROSS_EXPOSURE: usize = 17;
    pub const RISK_CATEGORY: usize = 18;
    pub const COLLATERAL_CLASS: usize = 19;
    pub const VALUATION: usize = 20;
    pub const LTV_PCT: usize = 21;
    pub const WEIGHTED_LTV_PCT: usize = 22;
    pub const ENTERPRISE_CLASS: usize = 23;
    pub const COUNT: usize = 24;

    pub fn name(col: usize) -> &'static str {
        match col {
            CONTRACT_ID => "contract_id",
            CATEGORY_TAG => "category_tag",
            CLIENT_CODE => "client_code",
            EQUIPMENT => "equipment",
            PURPOSE => "purpose",
            CLIENT_CLASS => "client_class",
            LOAN_TYPE => "loan_type",
            FREQUENCY => "frequency",
            PERIOD => "period",
            TENURE_MONTHS => "tenure_months",
            RATE_FLOOR => "rate_floor",
            CONTRACT_RATE => "contract_rate",
            BASE_RATE => "base_rate",
            DISBURSED_AMOUNT => "disbursed_amount",
            CONTRACT_AMOUNT => "contract_amount",
            ANNUAL_COST => "annual_cost",
            EFFECTIVE_RATE => "effective_rate",
            GROSS_EXPOSURE => "gross_exposure",
            RISK_CATEGORY => "risk_category",
            COLLATERAL_CLASS => "collateral_class",
            VALUATION => "valuation",
            LTV_PCT => "ltv_pct",
            WEIGHTED_LTV_PCT => "weighted_ltv_pct",
            ENTERPRISE_CLASS => "enterprise_class",
            _ => "unknown",
        }
    }

    pub fn by_name(name: &str) -> Option<usize> {
        (0..COUNT).find(|&c| self::name(c) == name)
    }
}

// ---------------------------------------------------------------------------
// Category sentinels
// ---------------------------------------------------------------------------

/// Product prefixes seeded from the contract id that mark the two special
/// product classes, and the canonical labels they are remapped to when the
/// reclassifier relocates those rows.
pub const SENTINEL_DEPOSIT_BACKED: &str = "00";
pub const SENTINEL_MARGIN: &str = "MT";
pub const LABEL_DEPOSIT_BACKED: &str = "FD Loan";
pub const LABEL_MARGIN: &str = "Margin Trading";

/// Two-character product prefix of a raw contract id.
pub fn category_code(raw_id: &str) -> String {
    raw_id
        .trim()
        .chars()
        .take(2)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    Seed,
    PortfolioJoin,
    EnterpriseJoin,
    ExposureJoin,
    Reclassify,
    RateTerms,
    EnrichMissing,
    ClientClass,
    LoanType,
    CollateralClass,
    ValuationTiers,
    EnrichValuation,
    LoanMetrics,
    BlankSweep,
    RateFloorCheck,
    ControlTotal,
    PercentRescale,
}

impl StageId {
    pub const ALL: [StageId; 17] = [
        Self::Seed,
        Self::PortfolioJoin,
        Self::EnterpriseJoin,
        Self::ExposureJoin,
        Self::Reclassify,
        Self::RateTerms,
        Self::EnrichMissing,
        Self::ClientClass,
        Self::LoanType,
        Self::CollateralClass,
        Self::ValuationTiers,
        Self::EnrichValuation,
        Self::LoanMetrics,
        Self::BlankSweep,
        Self::RateFloorCheck,
        Self::ControlTotal,
        Self::PercentRescale,
    ];

    pub fn number(&self) -> u8 {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0) as u8 + 1
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::PortfolioJoin => "portfolio_join",
            Self::EnterpriseJoin => "enterprise_join",
            Self::ExposureJoin => "exposure_join",
            Self::Reclassify => "reclassify",
            Self::RateTerms => "rate_terms",
            Self::EnrichMissing => "enrich_missing",
            Self::ClientClass => "client_class",
            Self::LoanType => "loan_type",
            Self::CollateralClass => "collateral_class",
            Self::ValuationTiers => "valuation_tiers",
            Self::EnrichValuation => "enrich_valuation",
            Self::LoanMetrics => "loan_metrics",
            Self::BlankSweep => "blank_sweep",
            Self::RateFloorCheck => "rate_floor_check",
            Self::ControlTotal => "control_total",
            Self::PercentRescale => "percent_rescale",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.number(), self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seventeen_stages_in_order() {
        assert_eq!(StageId::ALL.len(), 17);
        assert_eq!(StageId::Seed.number(), 1);
        assert_eq!(StageId::Reclassify.number(), 5);
        assert_eq!(StageId::ControlTotal.number(), 16);
        assert_eq!(StageId::PercentRescale.number(), 17);
    }

    #[test]
    fn column_names_round_trip() {
        for c in 0..col::COUNT {
            assert_eq!(col::by_name(col::name(c)), Some(c));
        }
        assert_eq!(col::by_name("nope"), None);
    }

    #[test]
    fn category_code_is_the_id_prefix() {
        assert_eq!(category_code("LR00000049"), "LR");
        assert_eq!(category_code("  mt123456 "), "MT");
        assert_eq!(category_code("00445566"), "00");
        assert_eq!(category_code("x"), "X");
    }
}
