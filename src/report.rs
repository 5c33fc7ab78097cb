//! Structural decoding of LINZ NETZ quarter-hour CSV exports.
//!
//! The export is a `;`-delimited table with a header row:
//! `Datum von;Datum bis;<value column>;Ersatzwert`. Columns are addressed by
//! position because the value column header differs between export variants
//! (e.g. `Energiemenge in kWh`, `Verbrauch in kWh`).

use std::fs;
use std::io::Cursor;
use std::path::Path;

use csv::StringRecord;
use sha2::{Digest, Sha256};

use crate::ImportError;

pub const START_TIME_COLUMN: usize = 0;
pub const END_TIME_COLUMN: usize = 1;
pub const VALUE_COLUMN: usize = 2;
const MIN_COLUMNS: usize = 3;

/// One data row of the export, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    fields: Vec<String>,
}

impl ReportRow {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn start_time(&self) -> &str {
        self.field(START_TIME_COLUMN)
    }

    pub fn end_time(&self) -> &str {
        self.field(END_TIME_COLUMN)
    }

    pub fn value(&self) -> &str {
        self.field(VALUE_COLUMN)
    }

    pub fn field(&self, idx: usize) -> &str {
        self.fields.get(idx).map(String::as_str).unwrap_or_default()
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// A decoded export: header names plus rows, with a fingerprint of the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReport {
    headers: Vec<String>,
    rows: Vec<ReportRow>,
    sha256: String,
}

impl RawReport {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header text of the value column, which varies by export.
    pub fn value_column_name(&self) -> &str {
        self.headers
            .get(VALUE_COLUMN)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Looks up a field of `row` by header name.
    pub fn get<'a>(&self, row: &'a ReportRow, column: &str) -> Option<&'a str> {
        let idx = self.headers.iter().position(|header| header == column)?;
        row.fields.get(idx).map(String::as_str)
    }

    /// Hex-encoded SHA-256 of the bytes the report was decoded from.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

pub fn read_report_file(path: &Path) -> Result<RawReport, ImportError> {
    if !path.is_file() {
        return Err(ImportError::MalformedInput(format!(
            "report file at path {} not found",
            path.display()
        )));
    }

    let bytes = fs::read(path).map_err(|err| {
        ImportError::MalformedInput(format!("failed to read {}: {err}", path.display()))
    })?;
    parse_report_bytes(&bytes)
}

pub fn parse_report_bytes(bytes: &[u8]) -> Result<RawReport, ImportError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| ImportError::MalformedInput(format!("report is not valid UTF-8: {err}")))?;
    let mut report = parse_report_text(text)?;
    report.sha256 = sha256_hex(bytes);
    Ok(report)
}

pub fn parse_report_text(text: &str) -> Result<RawReport, ImportError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .from_reader(Cursor::new(text.as_bytes()));

    let headers = reader.headers().map_err(malformed)?.clone();
    if headers.len() < MIN_COLUMNS {
        return Err(ImportError::MalformedInput(format!(
            "report header has {} columns, expected at least {MIN_COLUMNS}",
            headers.len()
        )));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        rows.push(row_from_record(&record));
    }

    if rows.is_empty() {
        return Err(ImportError::MalformedInput(
            "report contains no data rows".to_string(),
        ));
    }

    Ok(RawReport {
        headers: headers.iter().map(|h| h.trim().to_string()).collect(),
        rows,
        sha256: sha256_hex(text.as_bytes()),
    })
}

fn row_from_record(record: &StringRecord) -> ReportRow {
    ReportRow::new(record.iter().map(str::trim))
}

fn malformed(err: csv::Error) -> ImportError {
    ImportError::MalformedInput(format!("CSV error: {err}"))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Datum von;Datum bis;Energiemenge in kWh;Ersatzwert\n\
17.09.2022 00:00;17.09.2022 00:15;0,123;\n\
17.09.2022 00:15;17.09.2022 00:30;0,456;\n";

    #[test]
    fn rows_keep_file_order_and_positional_access() {
        let report = parse_report_text(SAMPLE).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.value_column_name(), "Energiemenge in kWh");
        assert_eq!(report.rows()[0].start_time(), "17.09.2022 00:00");
        assert_eq!(report.rows()[1].end_time(), "17.09.2022 00:30");
        assert_eq!(report.rows()[1].value(), "0,456");
        assert_eq!(
            report.get(&report.rows()[0], "Datum bis"),
            Some("17.09.2022 00:15")
        );
    }

    #[test]
    fn value_column_is_found_by_position_not_name() {
        let text = "Datum von;Datum bis;Verbrauch in kWh;Ersatzwert\n\
17.09.2022 00:00;17.09.2022 00:15;1,5;\n";
        let report = parse_report_text(text).unwrap();
        assert_eq!(report.value_column_name(), "Verbrauch in kWh");
        assert_eq!(report.rows()[0].value(), "1,5");
    }

    #[test]
    fn byte_order_mark_is_stripped_from_first_header() {
        let text = format!("\u{feff}{SAMPLE}");
        let report = parse_report_text(&text).unwrap();
        assert_eq!(report.headers()[0], "Datum von");
    }

    #[test]
    fn header_only_report_is_malformed() {
        let err = parse_report_text("Datum von;Datum bis;Energiemenge in kWh;Ersatzwert\n")
            .unwrap_err();
        assert!(matches!(err, ImportError::MalformedInput(_)));
    }

    #[test]
    fn empty_text_is_malformed() {
        assert!(matches!(
            parse_report_text("").unwrap_err(),
            ImportError::MalformedInput(_)
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let err = parse_report_bytes(&[0xff, 0xfe, b';', b'\n']).unwrap_err();
        assert!(matches!(err, ImportError::MalformedInput(_)));
    }

    #[test]
    fn ragged_rows_are_malformed() {
        let text = "Datum von;Datum bis;Energiemenge in kWh;Ersatzwert\n\
17.09.2022 00:00;17.09.2022 00:15\n";
        assert!(matches!(
            parse_report_text(text).unwrap_err(),
            ImportError::MalformedInput(_)
        ));
    }

    #[test]
    fn missing_file_is_malformed() {
        let err = read_report_file(Path::new("does/not/exist.csv")).unwrap_err();
        assert!(matches!(err, ImportError::MalformedInput(_)));
    }

    #[test]
    fn fingerprint_is_stable_for_identical_bytes() {
        let a = parse_report_bytes(SAMPLE.as_bytes()).unwrap();
        let b = parse_report_bytes(SAMPLE.as_bytes()).unwrap();
        assert_eq!(a.sha256(), b.sha256());
        assert_eq!(a.sha256().len(), 64);
    }
}
