use csv::StringRecord;

use crate::catalog::InstrumentHints;
use crate::core::GenericResult;
use crate::formats::Report;
use crate::ledger::{CorporateActionDraft, Draft};
use crate::util::DecimalRestrictions;

use super::ParsedReport;
use super::common::{self, FieldMap};

pub fn parse(report: &Report) -> GenericResult<ParsedReport> {
    let map = FieldMap::new("Corporate actions", &report.fields);
    let mut result = ParsedReport::new();

    for (index, record) in report.records.iter().enumerate() {
        match parse_action(&map, record) {
            Ok(draft) => result.drafts.push(Draft::CorporateAction(draft)),
            Err(e) => result.add_row_error(index, e),
        }
    }

    Ok(result)
}

pub(super) fn parse_action(map: &FieldMap, record: &StringRecord) -> GenericResult<CorporateActionDraft> {
    let date = map.get_date(record, "Date")?;
    let action_type = map.get(record, "Action")?.to_owned();
    if action_type.is_empty() {
        return Err!("Got an empty action type");
    }

    let mut symbol = map.get_optional(record, "Symbol").map(ToOwned::to_owned);

    // Some generations carry a dedicated ISIN column, older ones only embed
    // it into the description. Actions like delistings may reference
    // securities no export ever identified - those stay unlinked.
    let mut isin = match map.get_optional(record, "ISIN") {
        Some(isin) => {
            isin::parse(isin).map_err(|_| format!("Invalid ISIN: {:?}", isin))?;
            Some(isin.to_owned())
        },
        None => None,
    };

    if isin.is_none() {
        if let Some(security) = map.get_optional(record, "Description")
            .and_then(common::parse_security_description)
        {
            isin = Some(security.isin);
            symbol.get_or_insert(security.symbol);
        }
    }

    let quantity = map.get_optional_amount(record, "Quantity", DecimalRestrictions::NonZero)?;
    let amount = map.get_optional_amount(record, "Amount", DecimalRestrictions::No)?;
    let proceeds = map.get_optional_amount(record, "Proceeds", DecimalRestrictions::No)?;

    let id_amount = proceeds.or(amount).or(quantity).unwrap_or_default();
    let id_key = isin.as_deref().or(symbol.as_deref()).unwrap_or(&action_type);
    let external_id = common::external_id(
        map.get_optional(record, "Transaction ID"), date, id_key, id_amount, "action");

    Ok(CorporateActionDraft {
        external_id,
        isin,
        hints: InstrumentHints {
            symbol,
            currency: map.get_optional(record, "Currency").map(str::to_uppercase),
            ..Default::default()
        },
        action_type,
        date,
        quantity,
        amount,
        proceeds,
        raw: common::raw_record(record),
    })
}

#[cfg(test)]
mod tests {
    use crate::formats;

    use indoc::indoc;

    use super::*;

    #[test]
    fn parsing() {
        let data = indoc!("
            Date,Action,Symbol,ISIN,Description,Quantity,Amount,Proceeds,Currency
            2026-03-02,Split,KESKOB,FI0009000202,KESKOB(FI0009000202) Split 2 for 1,100,,,EUR
            2026-03-15,Merger,,,TELIA1(SE0000667925) Merged (Acquisition),-500,,1900.00,EUR
            2026-03-20,Delisting,OLDCO,,OLDCO delisted from exchange,-10,,,EUR
        ");

        let report = formats::read(data.as_bytes());
        let parsed = parse(&report).unwrap();

        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.drafts.len(), 3);

        let actions: Vec<_> = parsed.drafts.iter().map(|draft| match draft {
            Draft::CorporateAction(action) => action,
            _ => panic!("Expected a corporate action draft"),
        }).collect();

        assert_eq!(actions[0].action_type, "Split");
        assert_eq!(actions[0].isin.as_deref(), Some("FI0009000202"));
        assert_eq!(actions[0].quantity, Some(dec!(100)));

        // ISIN recovered from the description
        assert_eq!(actions[1].isin.as_deref(), Some("SE0000667925"));
        assert_eq!(actions[1].hints.symbol.as_deref(), Some("TELIA1"));
        assert_eq!(actions[1].proceeds, Some(dec!(1900)));

        // No ISIN anywhere: the action stays unlinked
        assert_eq!(actions[2].isin, None);
        assert_eq!(actions[2].hints.symbol.as_deref(), Some("OLDCO"));
    }
}
