use diesel::prelude::*;

use crate::types::Date;

use super::schema::{
    cash_flows, corporate_actions, currency_rates, dividends, instrument_aliases, instruments,
    positions, snapshots, trades,
};

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = instruments)]
pub struct InstrumentRow {
    pub id: i32,
    pub isin: String,
    pub cusip: Option<String>,
    pub broker_id: Option<String>,
    pub figi: Option<String>,
    pub name: Option<String>,
    pub asset_category: Option<String>,
    pub venue: Option<String>,
    pub currency: Option<String>,
    pub multiplier: String,
    pub enrichment: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = instruments)]
pub struct NewInstrument<'a> {
    pub isin: &'a str,
    pub cusip: Option<&'a str>,
    pub broker_id: Option<&'a str>,
    pub figi: Option<&'a str>,
    pub name: Option<&'a str>,
    pub asset_category: Option<&'a str>,
    pub venue: Option<&'a str>,
    pub currency: Option<&'a str>,
    pub multiplier: String,
    pub enrichment: Option<String>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = instrument_aliases)]
pub struct InstrumentAliasRow {
    pub id: i32,
    pub instrument_id: i32,
    pub symbol: String,
    pub venue: String,
    pub source: String,
    pub valid_from: Option<Date>,
    pub valid_to: Option<Date>,
    pub is_primary: bool,
}

#[derive(Insertable)]
#[diesel(table_name = instrument_aliases)]
pub struct NewInstrumentAlias<'a> {
    pub instrument_id: i32,
    pub symbol: &'a str,
    pub venue: &'a str,
    pub source: String,
    pub valid_from: Option<Date>,
    pub valid_to: Option<Date>,
    pub is_primary: bool,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = trades)]
pub struct TradeRow {
    pub id: i32,
    pub external_id: String,
    pub instrument_id: i32,
    pub date: Date,
    pub settlement_date: Option<Date>,
    pub quantity: String,
    pub price: Option<String>,
    pub amount: String,
    pub commission: Option<String>,
    pub currency: String,
    pub currency_rate: Option<String>,
    pub raw_data: String,
}

#[derive(Insertable)]
#[diesel(table_name = trades)]
pub struct NewTrade {
    pub external_id: String,
    pub instrument_id: i32,
    pub date: Date,
    pub settlement_date: Option<Date>,
    pub quantity: String,
    pub price: Option<String>,
    pub amount: String,
    pub commission: Option<String>,
    pub currency: String,
    pub currency_rate: Option<String>,
    pub raw_data: String,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = dividends)]
pub struct DividendRow {
    pub id: i32,
    pub external_id: String,
    pub instrument_id: i32,
    pub date: Date,
    pub ex_date: Option<Date>,
    pub currency: String,
    pub gross_amount: String,
    pub withheld_tax: String,
    pub net_amount: String,
    pub per_share: Option<String>,
    pub currency_rate: Option<String>,
    pub base_amount: Option<String>,
    pub raw_data: String,
}

#[derive(Insertable)]
#[diesel(table_name = dividends)]
pub struct NewDividend {
    pub external_id: String,
    pub instrument_id: i32,
    pub date: Date,
    pub ex_date: Option<Date>,
    pub currency: String,
    pub gross_amount: String,
    pub withheld_tax: String,
    pub net_amount: String,
    pub per_share: Option<String>,
    pub currency_rate: Option<String>,
    pub base_amount: Option<String>,
    pub raw_data: String,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = cash_flows)]
pub struct CashFlowRow {
    pub id: i32,
    pub external_id: String,
    pub flow_type: String,
    pub date: Date,
    pub amount: String,
    pub currency: String,
    pub currency_rate: Option<String>,
    pub base_amount: Option<String>,
    pub raw_data: String,
}

#[derive(Insertable)]
#[diesel(table_name = cash_flows)]
pub struct NewCashFlow {
    pub external_id: String,
    pub flow_type: String,
    pub date: Date,
    pub amount: String,
    pub currency: String,
    pub currency_rate: Option<String>,
    pub base_amount: Option<String>,
    pub raw_data: String,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = corporate_actions)]
pub struct CorporateActionRow {
    pub id: i32,
    pub external_id: String,
    pub instrument_id: Option<i32>,
    pub action_type: String,
    pub date: Date,
    pub quantity: Option<String>,
    pub amount: Option<String>,
    pub proceeds: Option<String>,
    pub raw_data: String,
}

#[derive(Insertable)]
#[diesel(table_name = corporate_actions)]
pub struct NewCorporateAction {
    pub external_id: String,
    pub instrument_id: Option<i32>,
    pub action_type: String,
    pub date: Date,
    pub quantity: Option<String>,
    pub amount: Option<String>,
    pub proceeds: Option<String>,
    pub raw_data: String,
}

#[derive(Insertable)]
#[diesel(table_name = currency_rates)]
pub struct NewCurrencyRate<'a> {
    pub currency: &'a str,
    pub date: Date,
    pub rate: String,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = snapshots)]
pub struct SnapshotRow {
    pub id: i32,
    pub date: Date,
    pub total_value: String,
    pub reported_value: Option<String>,
    pub currency: String,
}

#[derive(Insertable)]
#[diesel(table_name = snapshots)]
pub struct NewSnapshot {
    pub date: Date,
    pub total_value: String,
    pub reported_value: Option<String>,
    pub currency: String,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = positions)]
pub struct PositionRow {
    pub id: i32,
    pub external_id: String,
    pub snapshot_id: i32,
    pub instrument_id: Option<i32>,
    pub symbol: String,
    pub isin: Option<String>,
    pub quantity: String,
    pub price: Option<String>,
    pub value: String,
    pub currency: String,
    pub currency_rate: Option<String>,
    pub raw_data: String,
}

#[derive(Insertable)]
#[diesel(table_name = positions)]
pub struct NewPosition {
    pub external_id: String,
    pub snapshot_id: i32,
    pub instrument_id: Option<i32>,
    pub symbol: String,
    pub isin: Option<String>,
    pub quantity: String,
    pub price: Option<String>,
    pub value: String,
    pub currency: String,
    pub currency_rate: Option<String>,
    pub raw_data: String,
}
