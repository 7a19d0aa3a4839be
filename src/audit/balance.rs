use diesel::prelude::*;
use log::debug;

use crate::core::GenericResult;
use crate::currency::converter::CurrencyConverter;
use crate::db;
use crate::db::schema::{cash_flows, dividends, snapshots, trades};
use crate::types::{Date, Decimal};
use crate::util::{self, DecimalRestrictions};

use super::{CheckKind, Finding, Severity};

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tolerances {
    /// Relative deviation up to which the reconciliation passes silently.
    pub warning: Decimal,
    /// Relative deviation above which the reconciliation fails.
    pub failure: Decimal,
}

impl Default for Tolerances {
    fn default() -> Tolerances {
        Tolerances {
            warning: dec!(0.01),
            failure: dec!(0.05),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Verdict {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub verdict: Verdict,
    pub period: (Date, Date),
    pub implied_value: Decimal,
    pub reported_value: Decimal,
    pub deviation: Decimal,
    /// Records excluded from the implied value as unconvertible.
    pub excluded: usize,
}

/// Replays all ledger activity between the earliest and the latest snapshot
/// and compares the implied closing account value against the one the source
/// reported. The deviation is judged against relative tolerance bands, so a
/// wider band can only ever improve the verdict.
pub fn reconcile(
    conn: &mut db::Connection, converter: &CurrencyConverter, margin_account: bool,
    tolerances: Tolerances, findings: &mut Vec<Finding>,
) -> GenericResult<Option<Reconciliation>> {
    let snapshots = snapshots::table
        .order(snapshots::date.asc())
        .select((snapshots::date, snapshots::total_value, snapshots::reported_value))
        .load::<(Date, String, Option<String>)>(conn)?;

    let (opening, closing) = match (snapshots.first(), snapshots.last()) {
        (Some(opening), Some(closing)) if opening.0 != closing.0 => (opening, closing),
        _ => {
            debug!("Skipping balance reconciliation: fewer than two snapshots in the ledger.");
            return Ok(None);
        },
    };

    let account_value = |(date, total, reported): &(Date, String, Option<String>)| {
        // The source-reported account value includes cash we don't track
        // position-wise, so it's preferred over our positions-only total
        util::parse_decimal(
            reported.as_deref().unwrap_or(total), DecimalRestrictions::No,
        ).map_err(|e| format!("Invalid snapshot value for {}: {}", util::format_date(*date), e))
    };

    let opening_value = account_value(opening)?;
    let opening_positions = util::parse_decimal(&opening.1, DecimalRestrictions::No)?;
    let closing_value = account_value(closing)?;
    let closing_positions = util::parse_decimal(&closing.1, DecimalRestrictions::No)?;

    let (period_start, period_end) = (opening.0, closing.0);
    let mut excluded = 0;

    let mut implied = opening_value + (closing_positions - opening_positions);

    let flows = cash_flows::table
        .filter(cash_flows::date.gt(period_start))
        .filter(cash_flows::date.le(period_end))
        .select(cash_flows::base_amount)
        .load::<Option<String>>(conn)?;

    for base_amount in flows {
        match base_amount {
            Some(amount) => implied += util::parse_decimal(&amount, DecimalRestrictions::No)?,
            None => excluded += 1,
        }
    }

    let dividend_amounts = dividends::table
        .filter(dividends::date.gt(period_start))
        .filter(dividends::date.le(period_end))
        .select(dividends::base_amount)
        .load::<Option<String>>(conn)?;

    for base_amount in dividend_amounts {
        match base_amount {
            Some(amount) => implied += util::parse_decimal(&amount, DecimalRestrictions::No)?,
            None => excluded += 1,
        }
    }

    let trade_rows = trades::table
        .filter(trades::date.gt(period_start))
        .filter(trades::date.le(period_end))
        .select((trades::date, trades::quantity, trades::amount, trades::commission,
                 trades::currency, trades::currency_rate))
        .load::<(Date, String, String, Option<String>, String, Option<String>)>(conn)?;

    for (date, quantity, amount, commission, currency, rate) in trade_rows {
        let quantity = util::parse_decimal(&quantity, DecimalRestrictions::NonZero)?;
        let amount = util::parse_decimal(&amount, DecimalRestrictions::StrictlyPositive)?;
        let commission = match commission {
            Some(ref commission) => util::parse_decimal(commission, DecimalRestrictions::No)?,
            None => dec!(0),
        };

        let explicit = match rate {
            Some(ref rate) => Some(util::parse_decimal(rate, DecimalRestrictions::StrictlyPositive)?),
            None => None,
        };

        // Buys consume cash, sells produce it. Commissions are stored as
        // negative cash deltas already.
        let cash_delta = if quantity.is_sign_positive() {-amount} else {amount} + commission;

        match converter.convert(conn, &currency, date, cash_delta, explicit)? {
            Some(base_delta) => implied += base_delta,
            None => excluded += 1,
        }
    }

    let deviation = (implied - closing_value).abs()
        / closing_value.abs().max(dec!(1));

    // Margin accounts legitimately deviate more: borrowed cash and interest
    // accruals between statement dates aren't in the ledger
    let multiplier = if margin_account {dec!(3)} else {dec!(1)};

    let verdict = if deviation <= tolerances.warning * multiplier {
        Verdict::Pass
    } else if deviation <= tolerances.failure * multiplier {
        Verdict::Warning
    } else {
        Verdict::Fail
    };

    if excluded > 0 {
        findings.push(Finding::new(
            CheckKind::BalanceReconciliation, Severity::Info, format!(
                "{} records are excluded from balance reconciliation as unconvertible", excluded)));
    }

    if verdict != Verdict::Pass {
        let severity = match verdict {
            Verdict::Warning => Severity::Warning,
            _ => Severity::Error,
        };

        findings.push(Finding::new(CheckKind::BalanceReconciliation, severity, format!(
            "Implied account value for {} deviates from the reported one by {}% \
             ({} vs {}). Common causes: FX revaluation of untracked cash balances, \
             unrealized P&L accrued before the opening snapshot, records missing \
             from the imported period.",
            util::format_date(period_end),
            util::round_to(deviation * dec!(100), 2),
            util::round_to(implied, 2), util::round_to(closing_value, 2))));
    }

    Ok(Some(Reconciliation {
        verdict,
        period: (period_start, period_end),
        implied_value: implied,
        reported_value: closing_value,
        deviation,
        excluded,
    }))
}
