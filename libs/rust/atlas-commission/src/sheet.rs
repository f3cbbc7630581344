//! Carrier sheet parsing
//!
//! Each carrier delivers its commission register as an XLSX with a fixed
//! column layout. The per-carrier column maps below name the columns by
//! their Excel letters; carrier detection goes by sheet name first, then by
//! a fuzzy header signature. Parsing is split so the row logic is pure:
//! calamine turns the worksheet into [`Cell`] rows, [`parse_rows`] does the
//! rest.

use atlas_core::{
    date_from_excel_serial, normalize_vb_name, normalize_vsnr, parse_amount, parse_date,
    parse_number, Cents,
};
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

use crate::error::CommissionError;
use crate::model::CommissionKind;
use crate::relevance::{classify_booking_code, is_relevant};

/// Column letters of one carrier's register layout.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub carrier: &'static str,
    pub vsnr: &'static str,
    pub amount: &'static str,
    /// Separate debit column; its value imports as a negative amount.
    pub chargeback: Option<&'static str>,
    pub booking_code: Option<&'static str>,
    pub payout_date: Option<&'static str>,
    pub commission_rate: Option<&'static str>,
    pub policyholder: Option<&'static str>,
    pub conditions_code: Option<&'static str>,
    /// Carrier-side intermediary (agent) name, where the register has one.
    pub intermediary: Option<&'static str>,
}

/// The registers ATLAS knows how to read.
pub const COLUMN_MAPS: &[ColumnMap] = &[
    ColumnMap {
        carrier: "Allianz",
        vsnr: "A",
        amount: "D",
        chargeback: None,
        booking_code: Some("F"),
        payout_date: Some("G"),
        commission_rate: Some("K"),
        policyholder: Some("AE"),
        conditions_code: None,
        intermediary: None,
    },
    ColumnMap {
        carrier: "SwissLife",
        vsnr: "Y",
        amount: "N",
        chargeback: None,
        booking_code: Some("O"),
        payout_date: Some("C"),
        commission_rate: None,
        policyholder: Some("U"),
        conditions_code: None,
        intermediary: None,
    },
    ColumnMap {
        carrier: "VB",
        vsnr: "B",
        amount: "O",
        chargeback: Some("P"),
        booking_code: Some("K"),
        payout_date: Some("AR"),
        commission_rate: None,
        policyholder: None,
        conditions_code: Some("M"),
        // VB records the advisor as "SURNAME (FIRSTNAME)" in column C.
        intermediary: Some("C"),
    },
];

/// Sheet-name aliases and header keywords used for format detection.
struct HeaderSignature {
    carrier: &'static str,
    sheet_names: &'static [&'static str],
    header_keywords: &'static [&'static str],
}

const HEADER_SIGNATURES: &[HeaderSignature] = &[
    HeaderSignature {
        carrier: "Allianz",
        sheet_names: &["allianz"],
        header_keywords: &["vtnr", "provisions-betrag", "courtagesatz", "auszahlungs-datum"],
    },
    HeaderSignature {
        carrier: "SwissLife",
        sheet_names: &["swisslife", "swiss life"],
        header_keywords: &[
            "versicherungsnummer",
            "buchwert",
            "abrechnungsnummer",
            "konditionssatz",
        ],
    },
    HeaderSignature {
        carrier: "VB",
        sheet_names: &["vb", "volkswohlbund"],
        header_keywords: &["vart", "gutschrift", "lastschrift", "abrechnung von"],
    },
];

/// Column map for a carrier name.
pub fn column_map_for(carrier: &str) -> Option<&'static ColumnMap> {
    COLUMN_MAPS.iter().find(|map| map.carrier == carrier)
}

/// Excel column letters to 0-based index (`A` = 0, `AE` = 30).
pub fn column_index(letters: &str) -> usize {
    letters
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize)
        - 1
}

/// One spreadsheet cell, already freed from calamine's type zoo.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Cell {
    fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
            Cell::Date(d) => Some(d.to_string()),
        }
    }

    fn amount(&self) -> Option<Cents> {
        match self {
            Cell::Number(n) => Some(Cents::from_euros(*n)),
            Cell::Text(s) => parse_amount(s),
            _ => None,
        }
    }

    fn number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => parse_number(s),
            _ => None,
        }
    }

    fn date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Text(s) => parse_date(s),
            // A bare number in a date column is an Excel serial.
            Cell::Number(n) => date_from_excel_serial(*n),
            Cell::Empty => None,
        }
    }
}

/// One parsed, settlement-ready register row.
#[derive(Debug, Clone)]
pub struct SheetRow {
    pub vsnr: String,
    pub vsnr_normalized: String,
    pub amount: Cents,
    pub kind: CommissionKind,
    pub booking_code_raw: Option<String>,
    pub payout_date: Option<NaiveDate>,
    pub policyholder: Option<String>,
    pub intermediary_name: Option<String>,
    pub commission_rate: Option<f64>,
    pub conditions_code: Option<String>,
    pub is_relevant: bool,
    pub row_hash: String,
    /// 1-based sheet row, header included.
    pub source_row: i64,
}

/// Result of parsing one sheet.
#[derive(Debug, Default)]
pub struct SheetParseResult {
    pub carrier: String,
    pub sheet_name: String,
    pub rows: Vec<SheetRow>,
    pub total_rows: i64,
    pub skipped_rows: i64,
    pub errors: Vec<String>,
}

/// Row fingerprint for duplicate protection, stable across re-imports:
/// `SHA-256(carrier | vsnr_normalized | amount 2dp | date | kind)`.
pub fn compute_row_hash(
    carrier: &str,
    vsnr_normalized: &str,
    amount: Cents,
    payout_date: Option<NaiveDate>,
    kind: CommissionKind,
) -> String {
    let date = payout_date.map(|d| d.to_string()).unwrap_or_default();
    let raw = format!(
        "{carrier}|{vsnr_normalized}|{amount}|{date}|{kind}",
        amount = amount.format_2dp(),
        kind = kind.as_str(),
    );
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// SHA-256 of a source file, the batch-level idempotence key.
pub fn compute_file_hash(path: &Path) -> Result<String, CommissionError> {
    let content = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&content)))
}

/// Parse data rows (everything after the header) for one carrier.
pub fn parse_rows<'a, I>(carrier: &str, rows: I) -> Result<SheetParseResult, CommissionError>
where
    I: IntoIterator<Item = &'a [Cell]>,
{
    let map = column_map_for(carrier)
        .ok_or_else(|| CommissionError::UnknownCarrier(carrier.to_string()))?;

    let vsnr_idx = column_index(map.vsnr);
    let amount_idx = column_index(map.amount);
    let chargeback_idx = map.chargeback.map(column_index);
    let code_idx = map.booking_code.map(column_index);
    let date_idx = map.payout_date.map(column_index);
    let rate_idx = map.commission_rate.map(column_index);
    let vn_idx = map.policyholder.map(column_index);
    let conditions_idx = map.conditions_code.map(column_index);
    let intermediary_idx = map.intermediary.map(column_index);

    let mut result = SheetParseResult {
        carrier: carrier.to_string(),
        sheet_name: carrier.to_string(),
        ..SheetParseResult::default()
    };

    for (offset, row) in rows.into_iter().enumerate() {
        // Header is row 1; data starts at sheet row 2.
        let source_row = offset as i64 + 2;
        result.total_rows += 1;

        let cell = |idx: usize| row.get(idx).unwrap_or(&Cell::Empty);

        let Some(vsnr) = cell(vsnr_idx).text() else {
            result.skipped_rows += 1;
            continue;
        };

        let mut amount = cell(amount_idx).amount();
        if amount.unwrap_or(Cents::ZERO) == Cents::ZERO {
            // VB books debits in a separate column; import them negative.
            if let Some(idx) = chargeback_idx {
                if let Some(debit) = cell(idx).amount() {
                    if debit != Cents::ZERO {
                        amount = Some(-debit.abs());
                    }
                }
            }
        }
        let Some(amount) = amount.filter(|a| *a != Cents::ZERO) else {
            result.skipped_rows += 1;
            continue;
        };

        let booking_code_raw = code_idx.and_then(|idx| cell(idx).text());
        let mut kind = classify_booking_code(carrier, booking_code_raw.as_deref());
        if amount.is_negative() {
            kind = CommissionKind::Chargeback;
        }

        let payout_date = date_idx.and_then(|idx| cell(idx).date());
        let commission_rate = rate_idx.and_then(|idx| cell(idx).number());
        let conditions_code = conditions_idx.and_then(|idx| cell(idx).text());

        let policyholder = vn_idx.and_then(|idx| cell(idx).text());
        let mut intermediary_name = intermediary_idx.and_then(|idx| cell(idx).text());
        if carrier == "VB" {
            // VB writes advisor names as "SURNAME (FIRSTNAME)".
            intermediary_name = intermediary_name.map(|name| normalize_vb_name(&name));
        }

        let vsnr_normalized = normalize_vsnr(&vsnr);
        let row_hash = compute_row_hash(carrier, &vsnr_normalized, amount, payout_date, kind);
        let relevant = is_relevant(
            carrier,
            commission_rate,
            booking_code_raw.as_deref(),
            conditions_code.as_deref(),
        );

        result.rows.push(SheetRow {
            vsnr,
            vsnr_normalized,
            amount,
            kind,
            booking_code_raw,
            payout_date,
            policyholder,
            intermediary_name,
            commission_rate,
            conditions_code,
            is_relevant: relevant,
            row_hash,
            source_row,
        });
    }

    Ok(result)
}

/// Open an XLSX and parse the sheet named after the carrier.
pub fn parse_carrier_file(path: &Path, carrier: &str) -> Result<SheetParseResult, CommissionError> {
    let mut workbook: Xlsx<_> = open_workbook::<Xlsx<_>, _>(path)
        .map_err(|e| CommissionError::Spreadsheet(e.to_string()))?;
    let range = workbook
        .worksheet_range(carrier)
        .map_err(|e| CommissionError::Spreadsheet(format!("sheet '{carrier}': {e}")))?;

    let rows: Vec<Vec<Cell>> = range
        .rows()
        .skip(1)
        .map(|row| row.iter().map(convert_cell).collect())
        .collect();
    let borrowed: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
    let mut result = parse_rows(carrier, borrowed.iter().copied())?;
    result.sheet_name = carrier.to_string();
    info!(
        carrier,
        rows = result.rows.len(),
        skipped = result.skipped_rows,
        errors = result.errors.len(),
        "parsed carrier sheet"
    );
    Ok(result)
}

/// Carriers present in a workbook, with detection confidence, best first.
///
/// Exact sheet-name matches win; otherwise a header row scoring at least
/// two signature keywords identifies the format.
pub fn detect_carriers(path: &Path) -> Result<Vec<(String, f64)>, CommissionError> {
    let mut workbook: Xlsx<_> = open_workbook::<Xlsx<_>, _>(path)
        .map_err(|e| CommissionError::Spreadsheet(e.to_string()))?;
    let sheet_names = workbook.sheet_names().to_vec();
    let mut results: Vec<(String, f64)> = Vec::new();

    for signature in HEADER_SIGNATURES {
        if sheet_names.iter().any(|s| s == signature.carrier) {
            results.push((signature.carrier.to_string(), 1.0));
            continue;
        }
        if sheet_names
            .iter()
            .any(|s| signature.sheet_names.contains(&s.to_lowercase().as_str()))
        {
            results.push((signature.carrier.to_string(), 0.9));
        }
    }

    if results.is_empty() {
        for sheet in &sheet_names {
            let Ok(range) = workbook.worksheet_range(sheet) else {
                continue;
            };
            let Some(header_row) = range.rows().next() else {
                continue;
            };
            let header: String = header_row
                .iter()
                .map(|c| c.to_string().to_lowercase())
                .collect::<Vec<_>>()
                .join(" ");
            if let Some((carrier, confidence)) = score_header(&header) {
                results.push((carrier.to_string(), confidence));
                break;
            }
        }
    }

    results.sort_by(|a, b| b.1.total_cmp(&a.1));
    results.dedup_by(|a, b| a.0 == b.0);
    Ok(results)
}

/// Score one header line against the known signatures; ≥ 2 keyword hits
/// identify a carrier.
pub fn score_header(header: &str) -> Option<(&'static str, f64)> {
    for signature in HEADER_SIGNATURES {
        let hits = signature
            .header_keywords
            .iter()
            .filter(|kw| header.contains(*kw))
            .count();
        if hits >= 2 {
            return Some((signature.carrier, 0.6 + 0.1 * hits as f64));
        }
    }
    None
}

pub(crate) fn convert_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => date_from_excel_serial(dt.as_f64())
            .map(Cell::Date)
            .unwrap_or(Cell::Empty),
        Data::DateTimeIso(s) => parse_date(s).map(Cell::Date).unwrap_or(Cell::Empty),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allianz_row(vsnr: &str, amount: &str, code: &str, date: &str, rate: f64) -> Vec<Cell> {
        // Columns: A=vsnr, D=amount, F=code, G=date, K=rate, AE=policyholder
        let mut row = vec![Cell::Empty; 31];
        row[column_index("A")] = Cell::Text(vsnr.into());
        row[column_index("D")] = Cell::Text(amount.into());
        row[column_index("F")] = Cell::Text(code.into());
        row[column_index("G")] = Cell::Text(date.into());
        row[column_index("K")] = Cell::Number(rate);
        row[column_index("AE")] = Cell::Text("Mustermann Max".into());
        row
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A"), 0);
        assert_eq!(column_index("B"), 1);
        assert_eq!(column_index("Z"), 25);
        assert_eq!(column_index("AA"), 26);
        assert_eq!(column_index("AE"), 30);
        assert_eq!(column_index("AR"), 43);
    }

    #[test]
    fn test_parse_allianz_row_normalizes() {
        let rows = vec![allianz_row("000-123 / 4500", "47,50", "AP", "01.02.2025", 25.0)];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        let result = parse_rows("Allianz", slices.iter().copied()).unwrap();

        assert_eq!(result.rows.len(), 1);
        let row = &result.rows[0];
        assert_eq!(row.vsnr_normalized, "12345");
        assert_eq!(row.amount, Cents(4_750));
        assert_eq!(row.kind, CommissionKind::Initial);
        assert_eq!(
            row.payout_date,
            NaiveDate::from_ymd_opt(2025, 2, 1)
        );
        assert!(row.is_relevant);
        assert_eq!(row.source_row, 2);
    }

    #[test]
    fn test_row_hash_stable_and_field_sensitive() {
        let base = compute_row_hash(
            "Allianz",
            "12345",
            Cents(4_750),
            NaiveDate::from_ymd_opt(2025, 2, 1),
            CommissionKind::Initial,
        );
        let same = compute_row_hash(
            "Allianz",
            "12345",
            Cents(4_750),
            NaiveDate::from_ymd_opt(2025, 2, 1),
            CommissionKind::Initial,
        );
        assert_eq!(base, same);

        let different_amount = compute_row_hash(
            "Allianz",
            "12345",
            Cents(4_751),
            NaiveDate::from_ymd_opt(2025, 2, 1),
            CommissionKind::Initial,
        );
        assert_ne!(base, different_amount);
    }

    #[test]
    fn test_skip_rules() {
        let rows = vec![
            allianz_row("", "47,50", "AP", "01.02.2025", 25.0), // no VSNR
            allianz_row("123", "", "AP", "01.02.2025", 25.0),   // no amount
            allianz_row("123", "0,00", "AP", "01.02.2025", 25.0), // zero amount
            allianz_row("123", "10,00", "AP", "01.02.2025", 25.0),
        ];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        let result = parse_rows("Allianz", slices.iter().copied()).unwrap();
        assert_eq!(result.total_rows, 4);
        assert_eq!(result.skipped_rows, 3);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].source_row, 5);
    }

    #[test]
    fn test_negative_amount_forces_chargeback() {
        let rows = vec![allianz_row("123", "-40,00", "AP", "01.02.2025", 25.0)];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        let result = parse_rows("Allianz", slices.iter().copied()).unwrap();
        assert_eq!(result.rows[0].kind, CommissionKind::Chargeback);
        assert_eq!(result.rows[0].amount, Cents(-4_000));
    }

    #[test]
    fn test_allianz_low_rate_irrelevant() {
        let rows = vec![allianz_row("123", "10,00", "AP", "01.02.2025", 12.5)];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        let result = parse_rows("Allianz", slices.iter().copied()).unwrap();
        assert!(!result.rows[0].is_relevant);
    }

    #[test]
    fn test_vb_chargeback_column_and_name() {
        // Columns: B=vsnr, C=policyholder, K=code, M=conditions, O=amount, P=debit
        let mut row = vec![Cell::Empty; 44];
        row[column_index("B")] = Cell::Text("98765".into());
        row[column_index("C")] = Cell::Text("MUSTERMANN (MAX)".into());
        row[column_index("K")] = Cell::Text("xx".into());
        row[column_index("M")] = Cell::Text("35".into());
        row[column_index("P")] = Cell::Text("80,00".into());
        row[column_index("AR")] = Cell::Text("15.03.2025".into());

        let rows = vec![row];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        let result = parse_rows("VB", slices.iter().copied()).unwrap();
        let parsed = &result.rows[0];
        assert_eq!(parsed.amount, Cents(-8_000));
        assert_eq!(parsed.kind, CommissionKind::Chargeback);
        assert_eq!(parsed.intermediary_name.as_deref(), Some("Mustermann Max"));
        assert!(parsed.is_relevant);
    }

    #[test]
    fn test_swisslife_relevance_cases() {
        // Columns: C=date, N=amount, O=code, U=policyholder, Y=vsnr
        let make = |code: &str, amount: &str| {
            let mut row = vec![Cell::Empty; 25];
            row[column_index("Y")] = Cell::Text("555123".into());
            row[column_index("N")] = Cell::Text(amount.into());
            row[column_index("O")] = Cell::Text(code.into());
            row[column_index("C")] = Cell::Text("01.02.2025".into());
            row
        };
        let rows = vec![make("BARM", "120,00"), make("", "80,00"), make("BARM", "-40,00")];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        let result = parse_rows("SwissLife", slices.iter().copied()).unwrap();

        assert!(result.rows[0].is_relevant);
        assert_eq!(result.rows[0].kind, CommissionKind::Initial);
        assert!(!result.rows[1].is_relevant);
        // Sign overrides the booking code.
        assert!(result.rows[2].is_relevant);
        assert_eq!(result.rows[2].kind, CommissionKind::Chargeback);
        assert_eq!(result.rows[2].amount, Cents(-4_000));
    }

    #[test]
    fn test_excel_numeric_cells() {
        let mut row = vec![Cell::Empty; 31];
        row[column_index("A")] = Cell::Number(1234500.0);
        row[column_index("D")] = Cell::Number(47.5);
        row[column_index("G")] = Cell::Number(45689.0); // 2025-02-01
        let rows = vec![row];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        let result = parse_rows("Allianz", slices.iter().copied()).unwrap();
        let parsed = &result.rows[0];
        assert_eq!(parsed.vsnr, "1234500");
        assert_eq!(parsed.vsnr_normalized, "12345");
        assert_eq!(parsed.amount, Cents(4_750));
        assert_eq!(parsed.payout_date, NaiveDate::from_ymd_opt(2025, 2, 1));
    }

    #[test]
    fn test_unknown_carrier_errors() {
        let rows: Vec<&[Cell]> = Vec::new();
        assert!(matches!(
            parse_rows("Gothaer", rows),
            Err(CommissionError::UnknownCarrier(_))
        ));
    }

    #[test]
    fn test_score_header() {
        let header = "vtnr provisions-betrag courtagesatz auszahlungs-datum vn";
        let (carrier, confidence) = score_header(header).unwrap();
        assert_eq!(carrier, "Allianz");
        assert!(confidence > 0.9);
        assert!(score_header("vtnr only").is_none());
    }
}
