use diesel::prelude::*;
use log::warn;
use serde_json::{Map, Value};

use crate::core::{EmptyResult, GenericResult};
use crate::db::{self, models::{InstrumentAliasRow, InstrumentRow, NewInstrument, NewInstrumentAlias}};
use crate::db::schema::{instrument_aliases, instruments};
use crate::types::{Date, Decimal};
use crate::util::{self, DecimalRestrictions};

/// Everything a parser happened to learn about an instrument besides its
/// natural key. All optional: different report formats carry different
/// subsets.
#[derive(Default, Clone)]
pub struct InstrumentHints {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub venue: Option<String>,
    pub currency: Option<String>,
    pub asset_category: Option<String>,
    pub cusip: Option<String>,
    pub broker_id: Option<String>,
    pub multiplier: Option<Decimal>,
}

/// Alias provenance, in decreasing order of authority. The primary alias of
/// an instrument is the one with the most authoritative source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AliasSource {
    Enrichment,
    BrokerReport,
}

impl AliasSource {
    fn priority(self) -> u8 {
        match self {
            AliasSource::Enrichment => 2,
            AliasSource::BrokerReport => 1,
        }
    }
}

fn alias_priority(source: &str) -> u8 {
    source.parse::<AliasSource>().map(AliasSource::priority).unwrap_or(0)
}

/// The canonical instrument catalog: ISIN uniquely determines an instrument,
/// instruments are never deleted, only enriched.
pub struct Catalog;

impl Catalog {
    /// Atomic get-or-create keyed by ISIN. Two concurrent imports
    /// discovering the same previously-unseen ISIN end up with a single
    /// catalog entry: insert-or-ignore and the UNIQUE constraint are the
    /// backstop, not application-level locking.
    pub fn resolve(
        conn: &mut db::Connection, isin: &str, hints: &InstrumentHints,
    ) -> GenericResult<InstrumentRow> {
        let isin = isin.trim();
        ::isin::parse(isin).map_err(|_| format!("Invalid ISIN: {:?}", isin))?;

        if let Some(ref cusip) = hints.cusip {
            if ::cusip::CUSIP::parse(cusip).is_err() {
                return Err!("Invalid CUSIP: {:?}", cusip);
            }
        }

        let instrument = conn.transaction::<_, crate::core::GenericError, _>(|conn| {
            let created = diesel::insert_or_ignore_into(instruments::table)
                .values(NewInstrument {
                    isin: isin,
                    cusip: hints.cusip.as_deref(),
                    broker_id: hints.broker_id.as_deref(),
                    figi: None,
                    name: hints.name.as_deref(),
                    asset_category: hints.asset_category.as_deref(),
                    venue: hints.venue.as_deref(),
                    currency: hints.currency.as_deref(),
                    multiplier: hints.multiplier.unwrap_or(dec!(1)).to_string(),
                    enrichment: None,
                })
                .execute(conn)? > 0;

            let instrument = instruments::table
                .filter(instruments::isin.eq(isin))
                .select(InstrumentRow::as_select())
                .get_result(conn)?;

            if !created {
                merge_hints(conn, &instrument, hints)?;
            }

            Ok(instrument)
        })?;

        if let Some(ref symbol) = hints.symbol {
            Catalog::record_alias(
                conn, instrument.id, symbol, hints.venue.as_deref().unwrap_or(""),
                AliasSource::BrokerReport, None)?;
        }

        Ok(instrument)
    }

    pub fn find(conn: &mut db::Connection, isin: &str) -> GenericResult<Option<InstrumentRow>> {
        Ok(instruments::table
            .filter(instruments::isin.eq(isin))
            .select(InstrumentRow::as_select())
            .get_result(conn).optional()?)
    }

    /// Looks an instrument up by one of its symbol aliases. Used for soft
    /// linking of records that carry no natural key at all.
    pub fn find_by_symbol(conn: &mut db::Connection, symbol: &str) -> GenericResult<Option<InstrumentRow>> {
        let mut instruments = instrument_aliases::table
            .inner_join(instruments::table)
            .filter(instrument_aliases::symbol.eq(symbol))
            .select(InstrumentRow::as_select())
            .load::<InstrumentRow>(conn)?;

        // A symbol reassigned to a different instrument over time maps to
        // several catalog entries and can't be resolved without a validity
        // interval, so we don't guess.
        Ok(match instruments.len() {
            1 => Some(instruments.pop().unwrap()),
            _ => None,
        })
    }

    /// Idempotent alias upsert keyed by (instrument, symbol, venue). An
    /// alias with a different venue or validity range becomes a new row
    /// rather than overwriting an existing one.
    pub fn record_alias(
        conn: &mut db::Connection, instrument_id: i32, symbol: &str, venue: &str,
        source: AliasSource, validity: Option<(Date, Option<Date>)>,
    ) -> EmptyResult {
        let (valid_from, valid_to) = match validity {
            Some((from, to)) => (Some(from), to),
            None => (None, None),
        };

        diesel::insert_or_ignore_into(instrument_aliases::table)
            .values(NewInstrumentAlias {
                instrument_id,
                symbol,
                venue,
                source: source.to_string(),
                valid_from,
                valid_to,
                is_primary: false,
            })
            .execute(conn)?;

        Catalog::ensure_primary_alias(conn, instrument_id)
    }

    /// Picks the primary alias deterministically: the highest-priority
    /// source wins, row id breaks ties. Demotion of the old primary and
    /// promotion of the new one happen in one transaction, so readers never
    /// observe two primaries.
    fn ensure_primary_alias(conn: &mut db::Connection, instrument_id: i32) -> EmptyResult {
        let aliases = instrument_aliases::table
            .filter(instrument_aliases::instrument_id.eq(instrument_id))
            .select(InstrumentAliasRow::as_select())
            .load::<InstrumentAliasRow>(conn)?;

        let best = aliases.iter()
            .max_by_key(|alias| (alias_priority(&alias.source), -i64::from(alias.id)))
            .ok_or_else(|| format!("Instrument #{} has no aliases", instrument_id))?;

        if best.is_primary {
            return Ok(());
        }

        conn.transaction::<_, crate::core::GenericError, _>(|conn| {
            diesel::update(instrument_aliases::table
                .filter(instrument_aliases::instrument_id.eq(instrument_id)))
                .set(instrument_aliases::is_primary.eq(false))
                .execute(conn)?;

            diesel::update(instrument_aliases::table
                .filter(instrument_aliases::id.eq(best.id)))
                .set(instrument_aliases::is_primary.eq(true))
                .execute(conn)?;

            Ok(())
        })
    }

    pub fn primary_alias(conn: &mut db::Connection, instrument_id: i32) -> GenericResult<Option<String>> {
        Ok(instrument_aliases::table
            .filter(instrument_aliases::instrument_id.eq(instrument_id))
            .filter(instrument_aliases::is_primary.eq(true))
            .select(instrument_aliases::symbol)
            .get_result::<String>(conn).optional()?)
    }

    /// Merges a key into the instrument's enrichment bag, tracking the
    /// provenance of each enrichment alongside the value.
    pub fn enrich(
        conn: &mut db::Connection, instrument_id: i32, key: &str, value: Value, source: &str,
    ) -> EmptyResult {
        let current = instruments::table
            .filter(instruments::id.eq(instrument_id))
            .select(instruments::enrichment)
            .get_result::<Option<String>>(conn)?;

        let mut bag: Map<String, Value> = match current {
            Some(ref serialized) => serde_json::from_str(serialized).map_err(|e| format!(
                "Got an invalid enrichment bag for instrument #{}: {}", instrument_id, e))?,
            None => Map::new(),
        };

        bag.insert(key.to_owned(), value);
        bag.insert(format!("{}_source", key), Value::String(source.to_owned()));

        diesel::update(instruments::table.filter(instruments::id.eq(instrument_id)))
            .set(instruments::enrichment.eq(Value::Object(bag).to_string()))
            .execute(conn)?;

        Ok(())
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = instruments)]
struct InstrumentPatch<'a> {
    cusip: Option<&'a str>,
    broker_id: Option<&'a str>,
    name: Option<&'a str>,
    asset_category: Option<&'a str>,
    venue: Option<&'a str>,
    currency: Option<&'a str>,
}

// Fills in fields the catalog doesn't know yet. Existing values are never
// overwritten: a conflicting hint is surfaced as a warning instead of an
// auto-merge.
fn merge_hints(
    conn: &mut db::Connection, instrument: &InstrumentRow, hints: &InstrumentHints,
) -> EmptyResult {
    let mut patch = InstrumentPatch::default();
    let mut changed = false;

    macro_rules! fill {
        ($field:ident) => {
            match (&instrument.$field, &hints.$field) {
                (None, Some(value)) => {
                    patch.$field = Some(value.as_str());
                    changed = true;
                },
                (Some(existing), Some(value)) if existing != value => {
                    warn!(
                        "{}: conflicting {} hint: {:?} vs already known {:?}.",
                        instrument.isin, stringify!($field), value, existing);
                },
                _ => {},
            }
        }
    }

    fill!(cusip);
    fill!(broker_id);
    fill!(name);
    fill!(asset_category);
    fill!(venue);
    fill!(currency);

    if changed {
        diesel::update(instruments::table.filter(instruments::id.eq(instrument.id)))
            .set(patch)
            .execute(conn)?;
    }

    // The stored multiplier starts at the default of 1, so it can only be
    // specialized once: a second differing hint is a conflict
    if let Some(multiplier) = hints.multiplier {
        let known = util::parse_decimal(&instrument.multiplier, DecimalRestrictions::StrictlyPositive)
            .map_err(|_| format!(
                "Got an invalid multiplier from the database: {:?}", instrument.multiplier))?;

        if known != multiplier {
            if known == dec!(1) {
                diesel::update(instruments::table.filter(instruments::id.eq(instrument.id)))
                    .set(instruments::multiplier.eq(multiplier.to_string()))
                    .execute(conn)?;
            } else {
                warn!(
                    "{}: conflicting multiplier hint: {} vs already known {}.",
                    instrument.isin, multiplier, known);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(symbol: &str) -> InstrumentHints {
        InstrumentHints {
            symbol: Some(symbol.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn resolution() {
        let (_database, mut conn) = db::new_temporary();

        let first = Catalog::resolve(&mut conn, "FI0009000202", &InstrumentHints {
            symbol: Some(s!("KESKOB")),
            currency: Some(s!("EUR")),
            ..Default::default()
        }).unwrap();

        // The same ISIN under a different spelling resolves to the same
        // instrument and fills in fields we didn't know yet
        let second = Catalog::resolve(&mut conn, "FI0009000202", &InstrumentHints {
            symbol: Some(s!("KESKO B")),
            name: Some(s!("Kesko Oyj B")),
            venue: Some(s!("HEL")),
            ..Default::default()
        }).unwrap();

        assert_eq!(first.id, second.id);

        let merged = Catalog::find(&mut conn, "FI0009000202").unwrap().unwrap();
        assert_eq!(merged.currency.as_deref(), Some("EUR"));
        assert_eq!(merged.name.as_deref(), Some("Kesko Oyj B"));

        assert!(Catalog::resolve(&mut conn, "not-an-isin", &hints("X")).is_err());
    }

    #[test]
    fn conflicting_hints_are_not_merged() {
        let (_database, mut conn) = db::new_temporary();

        let instrument = Catalog::resolve(&mut conn, "FI0009000202", &InstrumentHints {
            currency: Some(s!("EUR")),
            ..hints("KESKOB")
        }).unwrap();

        Catalog::resolve(&mut conn, "FI0009000202", &InstrumentHints {
            currency: Some(s!("USD")),
            ..hints("KESKOB")
        }).unwrap();

        let row = Catalog::find(&mut conn, "FI0009000202").unwrap().unwrap();
        assert_eq!(row.id, instrument.id);
        assert_eq!(row.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn multiplier_specialization() {
        let (_database, mut conn) = db::new_temporary();

        let instrument = Catalog::resolve(&mut conn, "FI0009000202", &hints("KESKOB")).unwrap();
        assert_eq!(instrument.multiplier, "1");

        // A derivative confirmation specializes the default
        Catalog::resolve(&mut conn, "FI0009000202", &InstrumentHints {
            multiplier: Some(dec!(100)),
            ..hints("KESKOB")
        }).unwrap();

        let row = Catalog::find(&mut conn, "FI0009000202").unwrap().unwrap();
        assert_eq!(row.multiplier, "100");

        // A conflicting one doesn't overwrite it
        Catalog::resolve(&mut conn, "FI0009000202", &InstrumentHints {
            multiplier: Some(dec!(10)),
            ..hints("KESKOB")
        }).unwrap();

        let row = Catalog::find(&mut conn, "FI0009000202").unwrap().unwrap();
        assert_eq!(row.multiplier, "100");
    }

    #[test]
    fn primary_alias_selection() {
        let (_database, mut conn) = db::new_temporary();

        let instrument = Catalog::resolve(&mut conn, "SE0000667925", &hints("TELIA1")).unwrap();
        assert_eq!(
            Catalog::primary_alias(&mut conn, instrument.id).unwrap().as_deref(),
            Some("TELIA1"));

        // A broker-report alias doesn't displace an equally-sourced one...
        Catalog::record_alias(
            &mut conn, instrument.id, "TELIA", "STO", AliasSource::BrokerReport, None).unwrap();
        assert_eq!(
            Catalog::primary_alias(&mut conn, instrument.id).unwrap().as_deref(),
            Some("TELIA1"));

        // ...but a more authoritative source does, and there is exactly one
        // primary afterwards
        Catalog::record_alias(
            &mut conn, instrument.id, "TELIA SDB", "", AliasSource::Enrichment, None).unwrap();
        assert_eq!(
            Catalog::primary_alias(&mut conn, instrument.id).unwrap().as_deref(),
            Some("TELIA SDB"));

        let primary_count: i64 = instrument_aliases::table
            .filter(instrument_aliases::instrument_id.eq(instrument.id))
            .filter(instrument_aliases::is_primary.eq(true))
            .count()
            .get_result(&mut conn).unwrap();
        assert_eq!(primary_count, 1);

        // Re-recording the same alias is a no-op
        Catalog::record_alias(
            &mut conn, instrument.id, "TELIA", "STO", AliasSource::BrokerReport, None).unwrap();
        let alias_count: i64 = instrument_aliases::table
            .filter(instrument_aliases::instrument_id.eq(instrument.id))
            .count()
            .get_result(&mut conn).unwrap();
        assert_eq!(alias_count, 3);
    }

    #[test]
    fn symbol_reassignment() {
        let (_database, mut conn) = db::new_temporary();

        let first = Catalog::resolve(&mut conn, "FI0009000202", &hints("KESKOB")).unwrap();
        assert_eq!(
            Catalog::find_by_symbol(&mut conn, "KESKOB").unwrap().map(|row| row.id),
            Some(first.id));

        // The same symbol attached to a different instrument makes the
        // symbol ambiguous
        let second = Catalog::resolve(&mut conn, "SE0000667925", &hints("KESKOB")).unwrap();
        assert_ne!(first.id, second.id);
        assert!(Catalog::find_by_symbol(&mut conn, "KESKOB").unwrap().is_none());
    }

    #[test]
    fn enrichment() {
        let (_database, mut conn) = db::new_temporary();

        let instrument = Catalog::resolve(&mut conn, "FI0009000202", &hints("KESKOB")).unwrap();
        Catalog::enrich(
            &mut conn, instrument.id, "sector", Value::String(s!("Consumer Staples")),
            "reference-data").unwrap();
        Catalog::enrich(
            &mut conn, instrument.id, "dividend_per_share", Value::String(s!("0.22")),
            "dividend_report").unwrap();

        let row = Catalog::find(&mut conn, "FI0009000202").unwrap().unwrap();
        let bag: serde_json::Value = serde_json::from_str(&row.enrichment.unwrap()).unwrap();
        assert_eq!(bag["sector"], "Consumer Staples");
        assert_eq!(bag["sector_source"], "reference-data");
        assert_eq!(bag["dividend_per_share"], "0.22");
    }
}
