use std::collections::HashSet;
use std::fs;

use serde::Deserialize;

use crate::audit::{CheckKind, Tolerances};
use crate::core::GenericResult;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "db", default = "default_db_path")]
    pub db_path: String,

    pub base_currency: String,

    /// How many days back the rate table fallback is allowed to reach.
    #[serde(default = "default_fx_fallback_days")]
    pub fx_fallback_days: i64,

    #[serde(default)]
    pub margin_account: bool,

    #[serde(default)]
    pub tolerances: Tolerances,

    #[serde(default)]
    pub disabled_checks: HashSet<CheckKind>,
}

fn default_db_path() -> String {
    "~/.broker-ledger/ledger.db".to_owned()
}

fn default_fx_fallback_days() -> i64 {
    7
}

impl Config {
    pub fn load(path: &str) -> GenericResult<Config> {
        let path = shellexpand::tilde(path);

        let data = fs::read_to_string(path.as_ref()).map_err(|e| format!(
            "Unable to read {:?} configuration file: {}", path.as_ref(), e))?;

        let mut config: Config = serde_yaml::from_str(&data).map_err(|e| format!(
            "Error while parsing {:?} configuration file: {}", path.as_ref(), e))?;

        config.db_path = shellexpand::tilde(&config.db_path).to_string();
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> crate::core::EmptyResult {
        let currency = &self.base_currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err!("Invalid base currency: {:?}", currency);
        }

        if self.fx_fallback_days < 0 {
            return Err!("Invalid FX fallback window: {} days", self.fx_fallback_days);
        }

        let tolerances = &self.tolerances;
        if tolerances.warning <= dec!(0) || tolerances.failure < tolerances.warning {
            return Err!(
                "Invalid reconciliation tolerances: warning={}, failure={}",
                tolerances.warning, tolerances.failure);
        }

        Ok(())
    }
}
