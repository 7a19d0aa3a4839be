use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{error, info, warn};

use broker_ledger::audit::{Auditor, Severity};
use broker_ledger::config::Config;
use broker_ledger::core::EmptyResult;
use broker_ledger::currency::converter::CurrencyConverter;
use broker_ledger::db;
use broker_ledger::import::Importer;
use broker_ledger::types::Decimal;
use broker_ledger::util;

fn main() {
    let matches = Command::new("broker-ledger")
        .about("Reconciles brokerage export files into a single consistent ledger")
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("PATH")
            .default_value("~/.broker-ledger/config.yaml")
            .help("Configuration file path"))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .action(ArgAction::Count)
            .help("Sets the level of verbosity"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("import")
            .about("Import broker export files into the ledger")
            .arg(Arg::new("REPORTS")
                .help("Paths to broker export files")
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf))))
        .subcommand(Command::new("rates")
            .about("Load a currency rate table (Date,Currency,Rate CSV) into the database")
            .arg(Arg::new("RATES")
                .help("Path to the rate table file")
                .required(true)
                .value_parser(value_parser!(PathBuf))))
        .subcommand(Command::new("audit")
            .about("Run integrity checks and balance reconciliation over the ledger"))
        .get_matches();

    let log_level = match matches.get_count("verbose") {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    };

    if let Err(e) = easy_logging::init(module_path!().split("::").next().unwrap(), log_level) {
        let _ = writeln!(io::stderr(), "Failed to initialize the logging: {}.", e);
        process::exit(1);
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}.", e);
            process::exit(1);
        },
    };

    if let Err(e) = run(&config, &matches) {
        error!("{}.", e);
        process::exit(1);
    }
}

fn run(config: &Config, matches: &ArgMatches) -> EmptyResult {
    let mut conn = db::connect(&config.db_path)?;
    let converter = CurrencyConverter::new(&config.base_currency, config.fx_fallback_days);

    match matches.subcommand() {
        Some(("import", matches)) => {
            let paths: Vec<PathBuf> = matches.get_many::<PathBuf>("REPORTS")
                .unwrap().cloned().collect();

            let summary = Importer::new(&converter).import_batch(&mut conn, &paths)?;

            for error in &summary.errors {
                warn!("{}.", error);
            }

            info!(
                "Import finished: {} records created, {} duplicates skipped, {} failed.",
                summary.created, summary.skipped, summary.failed);

            if summary.failed > 0 {
                return Err(format!("{} records failed to import", summary.failed).into());
            }
        },

        Some(("rates", matches)) => {
            let path = matches.get_one::<PathBuf>("RATES").unwrap();
            let data = std::fs::read(path).map_err(|e| format!(
                "Unable to read {:?}: {}", path, e))?;

            let count = broker_ledger::currency::rates::import(&mut conn, &data)?;
            info!("Loaded {} currency rates.", count);
        },

        Some(("audit", _)) => {
            let auditor = Auditor::new(
                &converter, config.margin_account, config.tolerances,
                config.disabled_checks.clone());

            let report = auditor.run(&mut conn)?;

            for finding in &report.findings {
                match finding.severity {
                    Severity::Info => info!("{}: {}.", finding.check, finding.message),
                    Severity::Warning => warn!("{}: {}.", finding.check, finding.message),
                    Severity::Error => error!("{}: {}.", finding.check, finding.message),
                }
            }

            match report.reconciliation {
                Some(ref reconciliation) => info!(
                    "Balance reconciliation for {} - {}: {} (deviation: {}%).",
                    util::format_date(reconciliation.period.0),
                    util::format_date(reconciliation.period.1),
                    reconciliation.verdict,
                    util::round_to(reconciliation.deviation * Decimal::ONE_HUNDRED, 2)),
                None => info!("Balance reconciliation skipped: not enough snapshots."),
            }

            if report.has_errors() {
                return Err("The audit found errors".into());
            }
        },

        _ => unreachable!(),
    };

    Ok(())
}
