use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde_json::Value;

use crate::catalog::Catalog;
use crate::core::{EmptyResult, GenericResult};
use crate::currency::converter::CurrencyConverter;
use crate::db;
use crate::formats;
use crate::ledger::{Draft, LedgerWriter, WriteOutcome};
use crate::parsers;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ImportSummary {
    fn tally(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::Skipped => self.skipped += 1,
        }
    }

    fn merge(&mut self, other: ImportSummary) {
        self.created += other.created;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }
}

/// The import pipeline: classify the file, extract record drafts, resolve
/// instruments against the catalog and upsert everything into the ledger.
/// Duplicate records are skipped by external id, extraction failures are
/// collected per row - a single bad row never fails a file and a single
/// unreadable file never fails a batch.
pub struct Importer<'a> {
    converter: &'a CurrencyConverter,
}

impl<'a> Importer<'a> {
    pub fn new(converter: &'a CurrencyConverter) -> Importer<'a> {
        Importer {converter}
    }

    pub fn import_batch<P: AsRef<Path>>(
        &self, conn: &mut db::Connection, paths: &[P],
    ) -> GenericResult<ImportSummary> {
        let mut summary = ImportSummary::default();

        for path in paths {
            let path = path.as_ref();

            match self.import_path(conn, path) {
                Ok(file_summary) => summary.merge(file_summary),
                Err(e) => {
                    warn!("Failed to import {:?}: {}.", path, e);
                    summary.failed += 1;
                    summary.errors.push(format!("{:?}: {}", path, e));
                },
            }
        }

        Ok(summary)
    }

    pub fn import_path(
        &self, conn: &mut db::Connection, path: &Path,
    ) -> GenericResult<ImportSummary> {
        let data = fs::read(path).map_err(|e| format!("Unable to read {:?}: {}", path, e))?;
        self.import_data(conn, &data)
    }

    pub fn import_data(
        &self, conn: &mut db::Connection, data: &[u8],
    ) -> GenericResult<ImportSummary> {
        let report = formats::read(data);
        debug!("Importing a {} report.", report.format);

        let parsed = parsers::parse(&report)?;

        let mut summary = ImportSummary {
            failed: parsed.errors.len(),
            errors: parsed.errors,
            ..Default::default()
        };

        let writer = LedgerWriter::new(self.converter);

        for draft in &parsed.drafts {
            if let Err(e) = self.write_draft(conn, &writer, draft, &mut summary) {
                summary.failed += 1;
                summary.errors.push(e.to_string());
            }
        }

        Ok(summary)
    }

    fn write_draft(
        &self, conn: &mut db::Connection, writer: &LedgerWriter, draft: &Draft,
        summary: &mut ImportSummary,
    ) -> EmptyResult {
        match draft {
            Draft::Trade(trade) => {
                let instrument = Catalog::resolve(conn, &trade.isin, &trade.hints)?;
                summary.tally(writer.write_trade(conn, trade, instrument.id)?);
            },

            Draft::Dividend(dividend) => {
                let instrument = Catalog::resolve(conn, &dividend.isin, &dividend.hints)?;
                let outcome = writer.write_dividend(conn, dividend, instrument.id)?;

                if outcome == WriteOutcome::Created {
                    if let Some(per_share) = dividend.per_share {
                        Catalog::enrich(
                            conn, instrument.id, "dividend_per_share",
                            Value::String(per_share.to_string()), "dividend_report")?;
                    }
                }

                summary.tally(outcome);
            },

            Draft::CashFlow(cash_flow) => {
                summary.tally(writer.write_cash_flow(conn, cash_flow)?);
            },

            Draft::CorporateAction(action) => {
                let instrument_id = match action.isin {
                    Some(ref isin) => Some(Catalog::resolve(conn, isin, &action.hints)?.id),
                    None => self.soft_link(conn, action.hints.symbol.as_deref())?,
                };

                summary.tally(writer.write_corporate_action(conn, action, instrument_id)?);
            },

            Draft::Snapshot(snapshot) => {
                let mut instrument_ids = Vec::with_capacity(snapshot.positions.len());

                for position in &snapshot.positions {
                    instrument_ids.push(match position.isin {
                        Some(ref isin) => Some(Catalog::resolve(conn, isin, &position.hints)?.id),
                        None => self.soft_link(conn, Some(&position.symbol))?,
                    });
                }

                let (created, skipped) = writer.write_snapshot(conn, snapshot, &instrument_ids)?;
                summary.created += created;
                summary.skipped += skipped;
            },
        }

        Ok(())
    }

    /// Best-effort catalog link for records with no natural key: an
    /// unambiguous symbol alias links them, anything else stays unlinked
    /// for the audit engine to report.
    fn soft_link(
        &self, conn: &mut db::Connection, symbol: Option<&str>,
    ) -> GenericResult<Option<i32>> {
        Ok(match symbol {
            Some(symbol) => Catalog::find_by_symbol(conn, symbol)?.map(|instrument| instrument.id),
            None => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use diesel::prelude::*;
    use indoc::indoc;

    use crate::db::schema::{cash_flows, dividends, positions, snapshots, trades};
    use crate::util;

    use super::*;

    fn importer_fixture() -> (tempfile::NamedTempFile, db::Connection, CurrencyConverter) {
        let (database, conn) = db::new_temporary();
        let converter = CurrencyConverter::new("EUR", 7);
        (database, conn, converter)
    }

    #[test]
    fn reimport_is_idempotent() {
        let (_database, mut conn, converter) = importer_fixture();
        let importer = Importer::new(&converter);

        let data = indoc!("
            Transaction ID,Trade Date,Settle Date,Symbol,ISIN,Type,Quantity,Price,Amount,Commission,Currency,FX Rate
            T-1,2026-01-12,2026-01-14,KESKOB,FI0009000202,BUY,100,21.10,2110.00,-5.00,EUR,
            T-2,2026-01-13,,TELIA1,SE0000667925,SELL,200,3.80,760.00,,EUR,
        ").as_bytes();

        let first = importer.import_data(&mut conn, data).unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.failed, 0);

        let second = importer.import_data(&mut conn, data).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 2);

        let count: i64 = trades::table.count().get_result(&mut conn).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn dividend_import() {
        let (_database, mut conn, converter) = importer_fixture();
        let importer = Importer::new(&converter);

        let summary = importer.import_data(&mut conn, indoc!("
            Pay Date,Ex Date,Type,Description,Amount,Currency,FX Rate
            2026-01-15,2026-01-02,Dividend,KESKOB(FI0009000202) Cash Dividend EUR 0.22 per Share,220,EUR,
            2026-01-15,,Withholding Tax,KESKOB(FI0009000202) Cash Dividend EUR 0.22 per Share - FI Tax,-77,EUR,
        ").as_bytes()).unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 0);

        let (gross, withheld, net, base) = dividends::table
            .select((dividends::gross_amount, dividends::withheld_tax,
                     dividends::net_amount, dividends::base_amount))
            .get_result::<(String, String, String, Option<String>)>(&mut conn).unwrap();

        assert_eq!(gross, "220");
        assert_eq!(withheld, "-77");
        assert_eq!(net, "143");
        assert_eq!(base.as_deref(), Some("143"));

        // The per-share amount enriches the catalog entry
        let instrument = Catalog::find(&mut conn, "FI0009000202").unwrap().unwrap();
        let bag: serde_json::Value = serde_json::from_str(&instrument.enrichment.unwrap()).unwrap();
        assert_eq!(bag["dividend_per_share"], "0.22");
        assert_eq!(bag["dividend_per_share_source"], "dividend_report");
    }

    #[test]
    fn position_context_rate_converts_later_records() {
        let (_database, mut conn, converter) = importer_fixture();
        let importer = Importer::new(&converter);

        // A holdings snapshot carries a broker-reported USD rate
        importer.import_data(&mut conn, indoc!("
            Date,Symbol,ISIN,Name,Quantity,Price,Market Value,Currency,FX Rate
            2026-01-28,AAPL,US0378331005,Apple Inc,10,230.00,2300.00,USD,0.85
        ").as_bytes()).unwrap();

        // No rate table and no explicit rate: a nearby USD dividend falls
        // back to the position-context rate
        importer.import_data(&mut conn, indoc!("
            Pay Date,Ex Date,Type,Description,Amount,Currency,FX Rate
            2026-01-30,,Dividend,AAPL(US0378331005) Cash Dividend 0.25 USD per Share,100,USD,
        ").as_bytes()).unwrap();

        let (rate, base) = dividends::table
            .select((dividends::currency_rate, dividends::base_amount))
            .get_result::<(Option<String>, Option<String>)>(&mut conn).unwrap();

        assert_eq!(rate.as_deref(), Some("0.85"));
        assert_eq!(base.as_deref(), Some("85.00"));
    }

    #[test]
    fn holdings_reimport_converges() {
        let (_database, mut conn, converter) = importer_fixture();
        let importer = Importer::new(&converter);

        let data = indoc!("
            Date,Symbol,ISIN,Name,Quantity,Price,Market Value,Currency
            2026-01-31,KESKOB,FI0009000202,Kesko Oyj B,100,21.50,2150.00,EUR
            2026-01-31,TELIA1,SE0000667925,Telia Company,500,3.90,1950.00,EUR
        ").as_bytes();

        let first = importer.import_data(&mut conn, data).unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.failed, 0);

        let total = snapshots::table
            .select(snapshots::total_value)
            .get_result::<String>(&mut conn).unwrap();
        assert_eq!(total, "4100.00");

        let second = importer.import_data(&mut conn, data).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 2);

        let count: i64 = positions::table.count().get_result(&mut conn).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn raw_data_round_trip() {
        let (_database, mut conn, converter) = importer_fixture();
        let importer = Importer::new(&converter);

        importer.import_data(&mut conn, indoc!("
            Date,Type,Description,Amount,Currency,Balance
            2026-01-02,Deposit,Incoming wire transfer,5000.00,EUR,5000.00
        ").as_bytes()).unwrap();

        let raw = cash_flows::table
            .select(cash_flows::raw_data)
            .get_result::<String>(&mut conn).unwrap();

        let fields: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(fields, vec![
            "2026-01-02", "Deposit", "Incoming wire transfer", "5000.00", "EUR", "5000.00"]);
    }

    #[test]
    fn batch_continues_past_bad_files() {
        let (_database, mut conn, converter) = importer_fixture();
        let importer = Importer::new(&converter);

        let mut good = tempfile::NamedTempFile::new().unwrap();
        good.write_all(indoc!("
            Date,Type,Description,Amount,Currency,Balance
            2026-01-02,Deposit,Incoming wire transfer,5000.00,EUR,5000.00
        ").as_bytes()).unwrap();

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"Completely,Unknown,Layout\n1,2,3\n").unwrap();

        let summary = importer.import_batch(
            &mut conn, &[bad.path(), good.path()]).unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("Unrecognized"));
    }

    #[test]
    fn statement_import_populates_all_tables() {
        let (_database, mut conn, converter) = importer_fixture();
        let importer = Importer::new(&converter);

        let summary = importer.import_data(&mut conn, indoc!("
            Statement,Header,Field Name,Field Value
            Statement,Data,Period,2026-01-01 - 2026-01-31
            Trades,Header,Trade Date,Symbol,ISIN,Type,Quantity,Price,Amount,Commission,Currency
            Trades,Data,2026-01-12,KESKOB,FI0009000202,BUY,100,21.10,2110.00,-5.00,EUR
            Dividends,Header,Date,Description,Amount,Currency
            Dividends,Data,2026-01-15,KESKOB(FI0009000202) Cash Dividend EUR 0.22 per Share,220,EUR
            Withholding Tax,Header,Date,Description,Amount,Currency
            Withholding Tax,Data,2026-01-15,KESKOB(FI0009000202) Cash Dividend EUR 0.22 per Share - FI Tax,-77,EUR
            Deposits & Withdrawals,Header,Date,Description,Amount,Currency
            Deposits & Withdrawals,Data,2026-01-02,Incoming wire,5000,EUR
            Open Positions,Header,Symbol,ISIN,Quantity,Price,Market Value,Currency
            Open Positions,Data,KESKOB,FI0009000202,100,21.50,2150.00,EUR
        ").as_bytes()).unwrap();

        assert_eq!(summary.failed, 0, "{:?}", summary.errors);
        // Trade + dividend + deposit + position
        assert_eq!(summary.created, 4);

        let position_links: Vec<Option<i32>> = positions::table
            .select(positions::instrument_id)
            .load(&mut conn).unwrap();
        assert_eq!(position_links.len(), 1);
        assert!(position_links[0].is_some());
    }

    #[test]
    fn base_amounts_use_stored_decimal_math() {
        let (_database, mut conn, converter) = importer_fixture();
        let importer = Importer::new(&converter);

        importer.import_data(&mut conn, indoc!("
            Date,Type,Description,Amount,Currency,Balance
            2026-01-02,Deposit,Incoming transfer,0.1,EUR,0.1
            2026-01-03,Deposit,Incoming transfer,0.2,EUR,0.3
        ").as_bytes()).unwrap();

        let amounts = cash_flows::table
            .select(cash_flows::base_amount)
            .load::<Option<String>>(&mut conn).unwrap();

        let total: crate::types::Decimal = amounts.into_iter()
            .map(|amount| util::parse_decimal(
                &amount.unwrap(), util::DecimalRestrictions::No).unwrap())
            .sum();

        // 0.1 + 0.2 is exactly 0.3 in decimal arithmetic
        assert_eq!(total, dec!(0.3));
    }
}
