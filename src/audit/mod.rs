use std::collections::HashSet;

use serde::Deserialize;

use crate::core::GenericResult;
use crate::currency::converter::CurrencyConverter;
use crate::db;

pub mod balance;
mod checks;

pub use balance::{Reconciliation, Tolerances, Verdict};

/// The closed set of integrity checks. Each one can be disabled through the
/// configuration, so a known-bad historical account doesn't drown every
/// audit run in the same findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckKind {
    OrphanRecords,
    MissingFields,
    ReferentialIntegrity,
    Duplicates,
    BalanceReconciliation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub check: CheckKind,
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    fn new(check: CheckKind, severity: Severity, message: String) -> Finding {
        Finding {check, severity, message}
    }
}

pub struct AuditReport {
    pub findings: Vec<Finding>,
    pub reconciliation: Option<Reconciliation>,
}

impl AuditReport {
    /// Findings that weren't present in a previous run. Audit output is
    /// deterministic, so plain message comparison is enough to separate
    /// regressions from long-known issues.
    pub fn diff<'a>(&'a self, previous: &AuditReport) -> Vec<&'a Finding> {
        self.findings.iter()
            .filter(|finding| !previous.findings.contains(finding))
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|finding| finding.severity == Severity::Error)
    }
}

pub struct Auditor<'a> {
    converter: &'a CurrencyConverter,
    margin_account: bool,
    tolerances: Tolerances,
    disabled_checks: HashSet<CheckKind>,
}

impl<'a> Auditor<'a> {
    pub fn new(
        converter: &'a CurrencyConverter, margin_account: bool, tolerances: Tolerances,
        disabled_checks: HashSet<CheckKind>,
    ) -> Auditor<'a> {
        Auditor {converter, margin_account, tolerances, disabled_checks}
    }

    pub fn run(&self, conn: &mut db::Connection) -> GenericResult<AuditReport> {
        let mut findings = Vec::new();
        let mut reconciliation = None;

        if self.enabled(CheckKind::OrphanRecords) {
            checks::orphan_records(conn, &mut findings)?;
        }

        if self.enabled(CheckKind::MissingFields) {
            checks::missing_fields(conn, self.converter.base_currency(), &mut findings)?;
        }

        if self.enabled(CheckKind::ReferentialIntegrity) {
            checks::referential_integrity(conn, &mut findings)?;
        }

        if self.enabled(CheckKind::Duplicates) {
            checks::duplicates(conn, &mut findings)?;
        }

        if self.enabled(CheckKind::BalanceReconciliation) {
            reconciliation = balance::reconcile(
                conn, self.converter, self.margin_account, self.tolerances, &mut findings)?;
        }

        Ok(AuditReport {findings, reconciliation})
    }

    fn enabled(&self, check: CheckKind) -> bool {
        !self.disabled_checks.contains(&check)
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashset;

    use crate::db;

    use super::*;

    #[test]
    fn empty_ledger_is_clean() {
        let (_database, mut conn) = db::new_temporary();
        let converter = CurrencyConverter::new("EUR", 7);

        let auditor = Auditor::new(&converter, false, Tolerances::default(), HashSet::new());
        let report = auditor.run(&mut conn).unwrap();

        assert!(report.findings.is_empty());
        assert_eq!(report.reconciliation, None);
        assert!(!report.has_errors());
    }

    #[test]
    fn disabled_checks_are_skipped() {
        let (_database, mut conn) = db::new_temporary();
        let converter = CurrencyConverter::new("EUR", 7);

        let auditor = Auditor::new(&converter, false, Tolerances::default(), hashset!{
            CheckKind::OrphanRecords,
            CheckKind::MissingFields,
            CheckKind::ReferentialIntegrity,
            CheckKind::Duplicates,
            CheckKind::BalanceReconciliation,
        });

        let report = auditor.run(&mut conn).unwrap();
        assert!(report.findings.is_empty());
    }

    #[test]
    fn report_diff() {
        let finding = |message: &str| Finding::new(
            CheckKind::Duplicates, Severity::Warning, message.to_owned());

        let previous = AuditReport {
            findings: vec![finding("old issue")],
            reconciliation: None,
        };
        let current = AuditReport {
            findings: vec![finding("old issue"), finding("new issue")],
            reconciliation: None,
        };

        let new_findings = current.diff(&previous);
        assert_eq!(new_findings.len(), 1);
        assert_eq!(new_findings[0].message, "new issue");
    }
}
