use chrono::NaiveDate;
use ledgersort_core::{ClassificationResult, Money, RawTransaction};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d"];

pub const OUTPUT_HEADER: [&str; 9] = [
    "Date",
    "Description",
    "Out",
    "In",
    "Target Account",
    "Confidence",
    "Method",
    "Needs Review",
    "Reasoning",
];

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("Row {row}: invalid date '{value}'")]
    InvalidDate { row: usize, value: String },
    #[error("Row {row}: invalid amount '{value}'")]
    InvalidAmount { row: usize, value: String },
    #[error("{transactions} transactions but {results} results")]
    LengthMismatch { transactions: usize, results: usize },
}

struct Columns {
    date: usize,
    description: usize,
    out: usize,
    inflow: usize,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, CsvError> {
        let find = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or(CsvError::MissingColumn(name))
        };
        Ok(Self {
            date: find("Date")?,
            description: find("Description")?,
            out: find("Out")?,
            inflow: find("In")?,
        })
    }
}

/// Reads `Date, Description, Out, In` rows; other columns are ignored.
/// Row numbers in errors are 1-based and count data rows only.
pub fn read_transactions<R: Read>(data: R) -> Result<Vec<RawTransaction>, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);
    let columns = Columns::locate(reader.headers()?)?;

    let mut transactions = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let row = index + 1;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let field = |col: usize| record.get(col).unwrap_or_default();

        transactions.push(RawTransaction {
            date: parse_date(field(columns.date)).ok_or_else(|| CsvError::InvalidDate {
                row,
                value: field(columns.date).to_string(),
            })?,
            description: field(columns.description).to_string(),
            out_amount: parse_amount(row, field(columns.out))?,
            in_amount: parse_amount(row, field(columns.inflow))?,
        });
    }
    Ok(transactions)
}

pub fn read_path(path: &Path) -> Result<Vec<RawTransaction>, CsvError> {
    read_transactions(File::open(path)?)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Blank means absent. Thousands separators, quotes and currency symbols are
/// dropped before parsing.
fn parse_amount(row: usize, s: &str) -> Result<Option<Money>, CsvError> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, ',' | '"' | '$' | '₱' | ' '))
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&cleaned)
        .map(|d| Some(Money::from_decimal(d)))
        .map_err(|_| CsvError::InvalidAmount {
            row,
            value: s.to_string(),
        })
}

/// Writes one output row per transaction, paired with its result.
pub fn write_results<W: Write>(
    out: W,
    transactions: &[RawTransaction],
    results: &[ClassificationResult],
) -> Result<(), CsvError> {
    if transactions.len() != results.len() {
        return Err(CsvError::LengthMismatch {
            transactions: transactions.len(),
            results: results.len(),
        });
    }

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(OUTPUT_HEADER)?;
    for (tx, result) in transactions.iter().zip(results) {
        let amount = |m: Option<Money>| m.map(|m| m.to_string()).unwrap_or_default();
        writer.write_record([
            tx.date.format("%Y-%m-%d").to_string(),
            tx.description.clone(),
            amount(tx.out_amount),
            amount(tx.in_amount),
            result.account.as_ref().map(|a| a.to_string()).unwrap_or_default(),
            format!("{:.2}", result.confidence),
            result.method.to_string(),
            result.needs_review.to_string(),
            result.reasoning.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_path(
    path: &Path,
    transactions: &[RawTransaction],
    results: &[ClassificationResult],
) -> Result<(), CsvError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_results(File::create(path)?, transactions, results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersort_core::{AccountPath, Method};

    // ── parse_amount ──────────────────────────────────────────────────────────

    #[test]
    fn parse_amount_plain_and_blank() {
        assert_eq!(parse_amount(1, "123.45").unwrap(), Some(Money::from_cents(12345)));
        assert_eq!(parse_amount(1, "").unwrap(), None);
        assert_eq!(parse_amount(1, "   ").unwrap(), None);
    }

    #[test]
    fn parse_amount_with_separators_and_symbols() {
        assert_eq!(parse_amount(1, "1,234.56").unwrap(), Some(Money::from_cents(123456)));
        assert_eq!(parse_amount(1, "₱ 2,500").unwrap(), Some(Money::from_cents(250000)));
        assert_eq!(parse_amount(1, "\"99.99\"").unwrap(), Some(Money::from_cents(9999)));
    }

    #[test]
    fn parse_amount_invalid_names_row() {
        match parse_amount(7, "twelve") {
            Err(CsvError::InvalidAmount { row, value }) => {
                assert_eq!(row, 7);
                assert_eq!(value, "twelve");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ── parse_date ────────────────────────────────────────────────────────────

    #[test]
    fn parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_date("2024-01-15"), Some(expected));
        assert_eq!(parse_date("1/15/2024"), Some(expected));
        assert_eq!(parse_date("2024/01/15"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    // ── reading ───────────────────────────────────────────────────────────────

    #[test]
    fn read_basic() {
        let data = "Date,Description,Personal,Out,In\n\
                    2025-01-15,grab car,,250.00,\n\
                    1/16/2025,ara reimburse cash,x,,500.00\n\
                    ,,,,\n";
        let txs = read_transactions(data.as_bytes()).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].out_amount, Some(Money::from_cents(25000)));
        assert_eq!(txs[0].in_amount, None);
        assert_eq!(txs[1].description, "ara reimburse cash");
        assert_eq!(txs[1].in_amount, Some(Money::from_cents(50000)));
    }

    #[test]
    fn headers_are_case_insensitive() {
        let data = "date,DESCRIPTION,out,in\n2025-01-15,grab car,250,\n";
        assert_eq!(read_transactions(data.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn missing_column_is_reported() {
        let data = "Date,Description,Amount\n2025-01-15,grab car,250\n";
        assert!(matches!(
            read_transactions(data.as_bytes()),
            Err(CsvError::MissingColumn("Out"))
        ));
    }

    #[test]
    fn bad_date_names_row() {
        let data = "Date,Description,Out,In\n2025-01-15,a,1,\nsoon,b,2,\n";
        assert!(matches!(
            read_transactions(data.as_bytes()),
            Err(CsvError::InvalidDate { row: 2, .. })
        ));
    }

    #[test]
    fn both_amounts_are_left_to_the_classifier() {
        let data = "Date,Description,Out,In\n2025-01-15,odd,1.00,2.00\n";
        let txs = read_transactions(data.as_bytes()).unwrap();
        assert!(txs[0].validate().is_err());
    }

    // ── writing ───────────────────────────────────────────────────────────────

    #[test]
    fn write_rows() {
        let txs = vec![
            RawTransaction::outgoing(
                NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
                "grab car",
                Money::from_cents(25000),
            ),
            RawTransaction::outgoing(
                NaiveDate::from_ymd_opt(2025, 1, 16).unwrap(),
                "unknown, vendor",
                Money::from_cents(100),
            ),
        ];
        let results = vec![
            ClassificationResult::matched(
                AccountPath::parse("Expenses:Transportation:Public").unwrap(),
                1.0,
                Method::ExactMatch,
                "Exact match for 'grab car'".into(),
            ),
            ClassificationResult::unresolved("No rule matched"),
        ];

        let mut buf = Vec::new();
        write_results(&mut buf, &txs, &results).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], OUTPUT_HEADER.join(","));
        assert_eq!(
            lines[1],
            "2025-01-15,grab car,250.00,,Expenses:Transportation:Public,1.00,exact_match,false,\
             Exact match for 'grab car'"
        );
        assert_eq!(
            lines[2],
            "2025-01-16,\"unknown, vendor\",1.00,,,0.00,unresolved,true,No rule matched"
        );
    }

    #[test]
    fn write_rejects_misaligned_input() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_results(&mut buf, &[], &[ClassificationResult::unresolved("x")]),
            Err(CsvError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn write_and_read_back_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("classified.csv");
        let txs = vec![RawTransaction::incoming(
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            "ara reimbursed",
            Money::from_cents(50000),
        )];
        write_path(&path, &txs, &[ClassificationResult::unresolved("x")]).unwrap();
        assert_eq!(read_path(&path).unwrap(), txs);
    }
}
