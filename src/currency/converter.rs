use crate::core::GenericResult;
use crate::db;
use crate::types::{Date, Decimal};

use super::rates;

/// Converts amounts into the base currency using a cascading resolution
/// order. Source files populate their own FX fields inconsistently, so a
/// single rate table lookup is not enough: the resolution order below keeps
/// every fallback auditable and independently testable.
///
/// 1. An explicit rate already carried on the record.
/// 2. Same currency as the base one - the rate is always exactly 1.
/// 3. A position in the same currency with a known broker-reported rate for
///    a nearby date.
/// 4. The rate table, with nearest-prior-date fallback within a bounded
///    window.
/// 5. Give up and mark the amount as unconverted. It's exposed to the
///    validation engine instead of being silently treated as rate=1: that
///    exact defaulting used to inflate yields for cross-currency payments.
pub struct CurrencyConverter {
    base_currency: String,
    fallback_days: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateResolution {
    Explicit(Decimal),
    BaseCurrency,
    PositionContext(Decimal),
    RateTable {rate: Decimal, date: Date},
    Unconverted,
}

impl RateResolution {
    pub fn rate(&self) -> Option<Decimal> {
        match *self {
            RateResolution::Explicit(rate) => Some(rate),
            RateResolution::BaseCurrency => Some(dec!(1)),
            RateResolution::PositionContext(rate) => Some(rate),
            RateResolution::RateTable {rate, ..} => Some(rate),
            RateResolution::Unconverted => None,
        }
    }
}

impl CurrencyConverter {
    pub fn new(base_currency: &str, fallback_days: i64) -> CurrencyConverter {
        CurrencyConverter {
            base_currency: base_currency.to_owned(),
            fallback_days,
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn resolve(
        &self, conn: &mut db::Connection, currency: &str, date: Date, explicit: Option<Decimal>,
    ) -> GenericResult<RateResolution> {
        if let Some(rate) = explicit {
            return Ok(RateResolution::Explicit(rate));
        }

        if currency == self.base_currency {
            return Ok(RateResolution::BaseCurrency);
        }

        if let Some(rate) = rates::position_rate(conn, currency, date)? {
            return Ok(RateResolution::PositionContext(rate));
        }

        if let Some((rate_date, rate)) = rates::nearest_prior(
            conn, currency, date, self.fallback_days)? {
            return Ok(RateResolution::RateTable {rate, date: rate_date});
        }

        Ok(RateResolution::Unconverted)
    }

    /// Returns the amount in base currency or None when the amount must be
    /// excluded from base-currency totals.
    pub fn convert(
        &self, conn: &mut db::Connection, currency: &str, date: Date, amount: Decimal,
        explicit: Option<Decimal>,
    ) -> GenericResult<Option<Decimal>> {
        Ok(self.resolve(conn, currency, date, explicit)?.rate().map(|rate| amount * rate))
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;

    use crate::currency::CurrencyRate;
    use crate::db;

    use super::*;

    #[test]
    fn cascade() {
        let (_database, mut conn) = db::new_temporary();
        let converter = CurrencyConverter::new("EUR", 7);

        rates::save(&mut conn, "USD", &[
            CurrencyRate {date: date!(2026, 1, 23), rate: dec!(0.92)},
            CurrencyRate {date: date!(2026, 1, 26), rate: dec!(0.93)},
        ]).unwrap();

        // An explicit rate always wins, even over the rate table
        assert_eq!(
            converter.resolve(&mut conn, "USD", date!(2026, 1, 26), Some(dec!(0.95))).unwrap(),
            RateResolution::Explicit(dec!(0.95)));

        // Base currency is always exactly 1, independent of rate table contents
        rates::save(&mut conn, "EUR", &[
            CurrencyRate {date: date!(2026, 1, 26), rate: dec!(42)},
        ]).unwrap();
        assert_eq!(
            converter.resolve(&mut conn, "EUR", date!(2026, 1, 26), None).unwrap(),
            RateResolution::BaseCurrency);

        // Exact date match
        assert_eq!(
            converter.resolve(&mut conn, "USD", date!(2026, 1, 26), None).unwrap(),
            RateResolution::RateTable {rate: dec!(0.93), date: date!(2026, 1, 26)});

        // Nearest prior date within the window
        assert_eq!(
            converter.resolve(&mut conn, "USD", date!(2026, 1, 25), None).unwrap(),
            RateResolution::RateTable {rate: dec!(0.92), date: date!(2026, 1, 23)});

        // Outside of the window
        assert_matches!(
            converter.resolve(&mut conn, "USD", date!(2026, 2, 15), None).unwrap(),
            RateResolution::Unconverted);

        // A currency we know nothing about is never defaulted to rate=1
        let resolution = converter.resolve(&mut conn, "SEK", date!(2026, 1, 26), None).unwrap();
        assert_eq!(resolution, RateResolution::Unconverted);
        assert_eq!(resolution.rate(), None);
    }
}
