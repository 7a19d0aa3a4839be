use crate::catalog::InstrumentHints;
use crate::types::{Date, Decimal};

pub mod writer;

pub use writer::{LedgerWriter, WriteOutcome};

/// Non-trade cash movement kinds. Everything a parser can't classify lands
/// in Other rather than being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CashFlowType {
    Deposit,
    Withdrawal,
    Interest,
    Fee,
    Other,
}

/// Normalized record drafts produced by parsers. Instruments are referenced
/// by natural key here - resolution to catalog identity happens later in the
/// import pipeline.
pub enum Draft {
    Trade(TradeDraft),
    Dividend(DividendDraft),
    CashFlow(CashFlowDraft),
    CorporateAction(CorporateActionDraft),
    Snapshot(SnapshotDraft),
}

pub struct TradeDraft {
    pub external_id: String,
    pub isin: String,
    pub hints: InstrumentHints,
    pub date: Date,
    pub settlement_date: Option<Date>,
    /// Signed: positive for buys, negative for sells.
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub commission: Option<Decimal>,
    pub currency: String,
    pub currency_rate: Option<Decimal>,
    pub raw: String,
}

pub struct DividendDraft {
    pub external_id: String,
    pub isin: String,
    pub hints: InstrumentHints,
    pub date: Date,
    pub ex_date: Option<Date>,
    pub currency: String,
    pub gross_amount: Decimal,
    /// Zero or negative. Net = gross + withheld.
    pub withheld_tax: Decimal,
    pub net_amount: Decimal,
    pub per_share: Option<Decimal>,
    pub currency_rate: Option<Decimal>,
    pub raw: String,
}

pub struct CashFlowDraft {
    pub external_id: String,
    pub flow_type: CashFlowType,
    pub date: Date,
    pub amount: Decimal,
    pub currency: String,
    pub currency_rate: Option<Decimal>,
    pub raw: String,
}

pub struct CorporateActionDraft {
    pub external_id: String,
    pub isin: Option<String>,
    pub hints: InstrumentHints,
    pub action_type: String,
    pub date: Date,
    pub quantity: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub proceeds: Option<Decimal>,
    pub raw: String,
}

pub struct PositionDraft {
    pub external_id: String,
    pub symbol: String,
    /// Optional on purpose: historical positions may predate the catalog and
    /// are then linked softly by symbol only. The audit engine surfaces
    /// these, we never silently repair them.
    pub isin: Option<String>,
    pub hints: InstrumentHints,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub value: Decimal,
    pub currency: String,
    pub currency_rate: Option<Decimal>,
    pub raw: String,
}

pub struct SnapshotDraft {
    pub date: Date,
    pub reported_value: Option<Decimal>,
    pub positions: Vec<PositionDraft>,
}
