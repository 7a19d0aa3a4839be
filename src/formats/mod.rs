use csv::{ReaderBuilder, StringRecord};
use log::{debug, trace};

pub mod sections;

/// The closed set of report types we know how to ingest. Detection is purely
/// content-based: file names lie, header signatures don't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReportFormat {
    HoldingsSnapshot,
    DividendReport,
    TradeReport,
    ActivityActions,
    MultiSectionStatement,
    CashSummary,
    Unrecognized,
}

pub struct Report {
    pub format: ReportFormat,
    pub fields: Vec<String>,
    pub records: Vec<StringRecord>,
}

/// Column-name signatures, most specific first. This is the only place
/// format column vocabularies are enumerated: the parsers look fields up
/// through the header, never by position, so column reordering between
/// report generations doesn't affect them.
const SIGNATURES: &[(ReportFormat, &[&str])] = &[
    (ReportFormat::TradeReport, &["Trade Date", "Quantity", "Price"]),
    (ReportFormat::DividendReport, &["Pay Date", "Description", "Amount"]),
    (ReportFormat::ActivityActions, &["Action", "Proceeds"]),
    (ReportFormat::CashSummary, &["Type", "Amount", "Balance"]),
    (ReportFormat::HoldingsSnapshot, &["Quantity", "Market Value"]),
];

/// Classifies raw file content and tokenizes it. Never fails: anything we
/// can't make sense of comes back as an unrecognized report with no records.
pub fn read(data: &[u8]) -> Report {
    let text = String::from_utf8_lossy(data);

    let records = match tokenize(&text) {
        Some(records) if !records.is_empty() => records,
        _ => {
            debug!("Unable to tokenize the report file.");
            return Report {
                format: ReportFormat::Unrecognized,
                fields: Vec::new(),
                records: Vec::new(),
            };
        },
    };

    // IB-style multi-section statements are structural, not header-driven:
    // the second column carries the row kind.
    if records[0].get(1) == Some("Header") {
        trace!("Detected a multi-section statement.");
        return Report {
            format: ReportFormat::MultiSectionStatement,
            fields: Vec::new(),
            records,
        };
    }

    let header = &records[0];
    let fields: Vec<String> = header.iter().map(|field| field.trim().to_owned()).collect();

    for (format, signature) in SIGNATURES {
        if signature.iter().all(|field| fields.iter().any(|other| other == field)) {
            trace!("Detected {} report by header signature.", format);

            // Some export tools re-insert the header line mid-file on page
            // boundaries. Strip the repeats before handing rows to parsers.
            let header = header.clone();
            let records = records.into_iter()
                .skip(1)
                .filter(|record| *record != header)
                .collect();

            return Report {format: *format, fields, records};
        }
    }

    debug!("The report file doesn't match any known header signature.");
    Report {
        format: ReportFormat::Unrecognized,
        fields: Vec::new(),
        records: Vec::new(),
    }
}

fn tokenize(text: &str) -> Option<Vec<StringRecord>> {
    let delimiter = sniff_delimiter(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();

    for record in reader.records() {
        let record = record.ok()?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        records.push(record);
    }

    Some(records)
}

fn sniff_delimiter(text: &str) -> u8 {
    match text.lines().next() {
        Some(line) if line.contains('\t') => b'\t',
        _ => b',',
    }
}
