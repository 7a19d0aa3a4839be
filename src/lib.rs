#[macro_use] pub mod core;
#[macro_use] pub mod types;

pub mod audit;
pub mod catalog;
pub mod config;
pub mod currency;
pub mod db;
pub mod formats;
pub mod import;
pub mod ledger;
pub mod parsers;
pub mod util;
