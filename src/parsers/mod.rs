use crate::core::GenericResult;
use crate::formats::{Report, ReportFormat};
use crate::ledger::Draft;

pub mod common;

mod actions;
mod cash;
mod dividends;
mod holdings;
mod statement;
mod trades;

/// Drafts extracted from one report plus per-row extraction failures. A row
/// failing extraction is skipped and reported - it never aborts the rest of
/// the file.
pub struct ParsedReport {
    pub drafts: Vec<Draft>,
    pub errors: Vec<String>,
}

impl ParsedReport {
    fn new() -> ParsedReport {
        ParsedReport {
            drafts: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn add_row_error(&mut self, index: usize, error: crate::core::GenericError) {
        self.errors.push(format!("Record #{}: {}", index + 1, error));
    }
}

pub fn parse(report: &Report) -> GenericResult<ParsedReport> {
    match report.format {
        ReportFormat::HoldingsSnapshot => holdings::parse(report),
        ReportFormat::DividendReport => dividends::parse(report),
        ReportFormat::TradeReport => trades::parse(report),
        ReportFormat::ActivityActions => actions::parse(report),
        ReportFormat::CashSummary => cash::parse(report),
        ReportFormat::MultiSectionStatement => statement::parse(report),
        ReportFormat::Unrecognized => Err!("Unrecognized report format"),
    }
}
