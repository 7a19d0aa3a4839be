use std::str::FromStr;

use rust_decimal::RoundingStrategy;

use crate::core::GenericResult;
use crate::types::{Date, Decimal};

#[derive(Clone, Copy)]
pub enum DecimalRestrictions {
    No,
    NonZero,
    NonNegative,
    StrictlyPositive,
}

pub fn parse_decimal(string: &str, restrictions: DecimalRestrictions) -> GenericResult<Decimal> {
    let value = Decimal::from_str(string).map_err(|_| format!(
        "Invalid decimal value: {:?}", string))?;
    validate_decimal(value, restrictions)
}

/// Parses amounts the way broker exports spell them: optional thousands
/// separators (comma, dot, space or non-breaking space) and either a decimal
/// point or a locale decimal comma.
pub fn parse_amount(string: &str, restrictions: DecimalRestrictions) -> GenericResult<Decimal> {
    let string = string.trim();
    if string.is_empty() {
        return Err!("Invalid amount: an empty string");
    }

    let cleaned = string.replace('\u{a0}', " ");

    let mut integer = cleaned.as_str();
    let mut fraction = "";
    let mut thousands_separator = ',';

    if let Some(index) = cleaned.rfind(['.', ',']) {
        let (left, right) = cleaned.split_at(index);

        // A comma followed by exactly three digits and no other separator
        // is a thousands separator, not a decimal comma.
        let thousands_comma = &right[..1] == "," && right.len() == 4 &&
            !left.contains([',', '.', ' ']) && !left.is_empty();

        if !thousands_comma {
            integer = left;
            fraction = &right[1..];

            // The rightmost separator is the decimal one, the other kind
            // splits thousands. The decimal separator reappearing in the
            // integer part is left in place for the parser to reject.
            if &right[..1] == "," {
                thousands_separator = '.';
            }
        }
    }

    let mut normalized = String::with_capacity(cleaned.len());
    normalized.extend(integer.chars().filter(|&c| c != thousands_separator && c != ' '));
    if !fraction.is_empty() {
        normalized.push('.');
        normalized.push_str(fraction);
    }

    parse_decimal(&normalized, restrictions)
}

fn validate_decimal(value: Decimal, restrictions: DecimalRestrictions) -> GenericResult<Decimal> {
    if !match restrictions {
        DecimalRestrictions::No => true,
        DecimalRestrictions::NonZero => !value.is_zero(),
        DecimalRestrictions::NonNegative => value.is_zero() || value.is_sign_positive(),
        DecimalRestrictions::StrictlyPositive => value.is_sign_positive() && !value.is_zero(),
    } {
        return Err!("The value doesn't comply to the specified restrictions: {}", value);
    }

    Ok(value)
}

pub fn round_to(value: Decimal, points: u32) -> Decimal {
    value.round_dp_with_strategy(points, RoundingStrategy::MidpointAwayFromZero).normalize()
}

/// Broker exports disagree even on date format: ISO, US and European
/// spellings all occur in the wild.
pub fn parse_flexible_date(date: &str) -> GenericResult<Date> {
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d"] {
        if let Ok(parsed) = Date::parse_from_str(date.trim(), format) {
            return Ok(parsed);
        }
    }
    Err!("Invalid date: {:?}", date)
}

pub fn format_date(date: Date) -> String {
    date.format("%d.%m.%Y").to_string()
}
