use std::collections::HashMap;

use csv::StringRecord;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::core::GenericResult;
use crate::types::{Date, Decimal};
use crate::util::{self, DecimalRestrictions};

/// Header-driven field access. Real-world exports add, remove and reorder
/// columns between report generations, so parsers look values up by header
/// name and never by position.
pub struct FieldMap {
    name: String,
    indices: HashMap<String, usize>,
}

impl FieldMap {
    pub fn new(name: &str, fields: &[String]) -> FieldMap {
        FieldMap::with_offset(name, fields, 0)
    }

    pub fn with_offset(name: &str, fields: &[String], offset: usize) -> FieldMap {
        FieldMap {
            name: name.to_owned(),
            indices: fields.iter().enumerate()
                .map(|(index, field)| (field.clone(), index + offset))
                .collect(),
        }
    }

    pub fn get<'r>(&self, record: &'r StringRecord, field: &str) -> GenericResult<&'r str> {
        if let Some(&index) = self.indices.get(field) {
            if let Some(value) = record.get(index) {
                return Ok(value.trim());
            }
        }

        Err!("{:?} record doesn't have {:?} field", self.name, field)
    }

    pub fn get_optional<'r>(&self, record: &'r StringRecord, field: &str) -> Option<&'r str> {
        self.indices.get(field)
            .and_then(|&index| record.get(index))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn get_date(&self, record: &StringRecord, field: &str) -> GenericResult<Date> {
        util::parse_flexible_date(self.get(record, field)?)
    }

    pub fn get_optional_date(&self, record: &StringRecord, field: &str) -> GenericResult<Option<Date>> {
        self.get_optional(record, field)
            .map(util::parse_flexible_date)
            .transpose()
    }

    pub fn get_amount(
        &self, record: &StringRecord, field: &str, restrictions: DecimalRestrictions,
    ) -> GenericResult<Decimal> {
        let value = self.get(record, field)?;
        Ok(util::parse_amount(value, restrictions).map_err(|e| format!(
            "Invalid {:?} field value: {}", field, e))?)
    }

    pub fn get_optional_amount(
        &self, record: &StringRecord, field: &str, restrictions: DecimalRestrictions,
    ) -> GenericResult<Option<Decimal>> {
        self.get_optional(record, field)
            .map(|value| util::parse_amount(value, restrictions).map_err(|e| format!(
                "Invalid {:?} field value: {}", field, e).into()))
            .transpose()
    }
}

/// Deduplication key for ledger records. The source's own transaction id is
/// preferred; when there is none, a stable tuple of business fields is
/// hashed, so re-importing the same file always derives the same id - dedup
/// must never depend on insertion order or autoincrement counters.
pub fn external_id(
    native: Option<&str>, date: Date, instrument_key: &str, amount: Decimal, row_type: &str,
) -> String {
    if let Some(id) = native {
        let id = id.trim();
        if !id.is_empty() {
            return id.to_owned();
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}|{}", date, instrument_key, amount.normalize(), row_type));

    let digest = hasher.finalize();
    let mut id = String::with_capacity(36);
    id.push_str("gen-");
    for byte in &digest[..16] {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

pub struct SecurityDescription {
    pub symbol: String,
    pub isin: String,
}

/// Extracts the natural key from free text following the fixed
/// `SYMBOL(ISIN) description` convention, tolerating square brackets and
/// whitespace before the bracket.
pub fn parse_security_description(description: &str) -> Option<SecurityDescription> {
    lazy_static! {
        static ref SECURITY_REGEX: Regex = Regex::new(
            r"^\s*(?P<symbol>[A-Z0-9][A-Z0-9. ]*?)\s*[(\[](?P<isin>[A-Z]{2}[A-Z0-9]{9}[0-9])[)\]]"
        ).unwrap();
    }

    let captures = SECURITY_REGEX.captures(description)?;
    let isin = captures.name("isin").unwrap().as_str();

    if isin::parse(isin).is_err() {
        return None;
    }

    Some(SecurityDescription {
        symbol: captures.name("symbol").unwrap().as_str().to_owned(),
        isin: isin.to_owned(),
    })
}

/// Extracts a per-share amount from a dividend description. Both
/// `0.22 EUR per Share` and `EUR 0.22 per Share` spellings occur in the
/// wild. Descriptions with no per-share text (payments in lieu, for one)
/// legitimately return None - the caller falls back to total-amount
/// semantics instead of failing.
pub fn parse_per_share_amount(description: &str) -> Option<Decimal> {
    lazy_static! {
        static ref PER_SHARE_REGEX: Regex = Regex::new(
            r"(?:\b[A-Z]{3}\s+)?(?P<amount>\d+(?:[.,]\d+)?)(?:\s+[A-Z]{3})?\s+[Pp]er\s+[Ss]hare\b"
        ).unwrap();
    }

    let captures = PER_SHARE_REGEX.captures(description)?;
    util::parse_amount(captures.name("amount").unwrap().as_str(),
                       DecimalRestrictions::StrictlyPositive).ok()
}

/// Preserves the original source row verbatim for audit and reprocessing.
pub fn raw_record(record: &StringRecord) -> String {
    serde_json::to_string(&record.iter().collect::<Vec<_>>()).unwrap()
}

/// Same, for ledger records merged from several source rows.
pub fn raw_records(records: &[StringRecord]) -> String {
    match records {
        [record] => raw_record(record),
        _ => serde_json::to_string(
            &records.iter().map(|record| record.iter().collect::<Vec<_>>()).collect::<Vec<_>>(),
        ).unwrap(),
    }
}
