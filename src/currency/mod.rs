use crate::types::{Date, Decimal};

pub mod converter;
pub mod rates;

#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyRate {
    pub date: Date,
    pub rate: Decimal,
}
