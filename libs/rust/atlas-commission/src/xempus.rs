//! Xempus contract export parsing
//!
//! The broker portal exports consultations as an XLSX whose "Beratungen"
//! sheet carries one contract per row. Column positions drift between
//! export versions, so detection is keyword-based against the header row,
//! with the portal's fixed id/status/VSNR columns as a fallback.

use atlas_core::{normalize_vsnr, parse_date, Cents};
use calamine::{open_workbook, Reader, Xlsx};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::CommissionError;
use crate::model::ContractStatus;
use crate::sheet::{column_index, Cell};

/// Sheet the contract stream comes from.
pub const CONTRACT_SHEET: &str = "Beratungen";

// Fixed portal columns, stable across export versions.
const ID_COL: &str = "AM";
const STATUS_COL: &str = "E";
const VSNR_COL: &str = "O";

/// Header keywords per logical field, checked against lowercased headers.
const COLUMN_KEYWORDS: &[(&str, &[&str])] = &[
    ("vsnr", &["versicherungsscheinnummer", "vsnr", "vertragsnummer"]),
    ("consultant", &["berater"]),
    ("status", &["status"]),
    ("carrier", &["versicherer", "gesellschaft"]),
    ("premium", &["gesamtbeitrag", "beitrag"]),
    ("policyholder", &["versicherungsnehmer", "vn"]),
    ("branch", &["sparte", "produktgruppe"]),
    ("tariff", &["tarif", "tarifname", "produkt"]),
    ("inception", &["beginn", "vertragsbeginn", "versicherungsbeginn"]),
];

/// One contract row from the export.
#[derive(Debug, Clone)]
pub struct XempusRow {
    pub vsnr: String,
    pub vsnr_normalized: String,
    pub status: ContractStatus,
    pub consultant_name: Option<String>,
    pub carrier: Option<String>,
    pub policyholder: Option<String>,
    pub branch: Option<String>,
    pub tariff: Option<String>,
    pub premium: Option<Cents>,
    pub inception: Option<NaiveDate>,
    /// Portal-internal consultation id; keys the contract when the VSNR is
    /// still empty.
    pub xempus_id: Option<String>,
    pub source_row: i64,
}

#[derive(Debug, Default)]
pub struct XempusParseResult {
    pub rows: Vec<XempusRow>,
    pub total_rows: i64,
    pub skipped_rows: i64,
    pub errors: Vec<String>,
}

/// Detect the logical columns from the header row. Returns 0-based indices.
pub fn detect_columns(header: &[Cell]) -> HashMap<&'static str, usize> {
    let mut mapping = HashMap::new();
    for (idx, cell) in header.iter().enumerate() {
        let Cell::Text(raw) = cell else { continue };
        let value = raw.trim().to_lowercase();
        if value.is_empty() {
            continue;
        }
        for (field, keywords) in COLUMN_KEYWORDS {
            if mapping.contains_key(field) {
                continue;
            }
            if keywords.iter().any(|kw| value.contains(kw)) {
                mapping.insert(*field, idx);
                break;
            }
        }
    }
    mapping
}

/// Map a portal status onto the contract status vocabulary.
///
/// `None` means the row must be skipped entirely ("nicht gewünscht").
pub fn map_status(raw: &str) -> Option<ContractStatus> {
    match raw.trim().to_lowercase().as_str() {
        "nicht gewünscht" | "nicht gewuenscht" => None,
        "abgeschlossen" | "geschlossen" | "policiert" => Some(ContractStatus::Concluded),
        "storniert" | "storno" => Some(ContractStatus::Cancelled),
        "angebot" | "angeboten" => Some(ContractStatus::Offer),
        "beantragt" => Some(ContractStatus::Applied),
        // Everything unknown counts as still open.
        _ => Some(ContractStatus::Open),
    }
}

/// Parse header + data rows into the contract stream.
pub fn parse_rows<'a, I>(mut rows: I) -> XempusParseResult
where
    I: Iterator<Item = &'a [Cell]>,
{
    let mut result = XempusParseResult::default();
    let Some(header) = rows.next() else {
        result.errors.push("sheet is empty".to_string());
        return result;
    };
    let columns = detect_columns(header);

    let vsnr_idx = columns.get("vsnr").copied().unwrap_or(column_index(VSNR_COL));
    let status_idx = columns
        .get("status")
        .copied()
        .unwrap_or(column_index(STATUS_COL));
    let id_idx = column_index(ID_COL);

    for (offset, row) in rows.enumerate() {
        let source_row = offset as i64 + 2;
        result.total_rows += 1;

        let cell = |idx: usize| row.get(idx).cloned().unwrap_or(Cell::Empty);
        let text = |idx: usize| match cell(idx) {
            Cell::Text(s) => {
                let t = s.trim().to_string();
                (!t.is_empty()).then_some(t)
            }
            Cell::Number(n) => Some(if n.fract() == 0.0 {
                format!("{}", n as i64)
            } else {
                n.to_string()
            }),
            Cell::Date(d) => Some(d.to_string()),
            Cell::Empty => None,
        };

        let status_raw = text(status_idx).unwrap_or_default();
        let Some(status) = map_status(&status_raw) else {
            result.skipped_rows += 1;
            continue;
        };

        let vsnr = text(vsnr_idx).unwrap_or_default();
        let xempus_id = text(id_idx);
        if vsnr.is_empty() && xempus_id.is_none() {
            result.skipped_rows += 1;
            continue;
        }

        let field = |name: &str| columns.get(name).copied().and_then(text);
        let premium = columns.get("premium").copied().and_then(|idx| match cell(idx) {
            Cell::Number(n) => Some(Cents::from_euros(n)),
            Cell::Text(s) => atlas_core::parse_amount(&s),
            _ => None,
        });
        let inception = columns.get("inception").copied().and_then(|idx| match cell(idx) {
            Cell::Date(d) => Some(d),
            Cell::Text(s) => parse_date(&s),
            _ => None,
        });

        result.rows.push(XempusRow {
            vsnr_normalized: normalize_vsnr(&vsnr),
            vsnr,
            status,
            consultant_name: field("consultant"),
            carrier: field("carrier"),
            policyholder: field("policyholder"),
            branch: field("branch"),
            tariff: field("tariff"),
            premium,
            inception,
            xempus_id,
            source_row,
        });
    }

    result
}

/// Open an export file and parse its "Beratungen" sheet.
pub fn parse_export(path: &Path) -> Result<XempusParseResult, CommissionError> {
    let mut workbook: Xlsx<_> = open_workbook::<Xlsx<_>, _>(path)
        .map_err(|e| CommissionError::Spreadsheet(e.to_string()))?;
    let range = workbook.worksheet_range(CONTRACT_SHEET).map_err(|e| {
        CommissionError::Spreadsheet(format!("sheet '{CONTRACT_SHEET}': {e}"))
    })?;

    let rows: Vec<Vec<Cell>> = range
        .rows()
        .map(|row| row.iter().map(crate::sheet::convert_cell).collect())
        .collect();
    let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
    let result = parse_rows(slices.iter().copied());
    info!(
        rows = result.rows.len(),
        skipped = result.skipped_rows,
        "parsed Xempus export"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<Cell> {
        let mut row = vec![Cell::Empty; 40];
        row[0] = Cell::Text("Versicherungsscheinnummer".into());
        row[1] = Cell::Text("Berater".into());
        row[2] = Cell::Text("Status".into());
        row[3] = Cell::Text("Versicherer".into());
        row[4] = Cell::Text("Gesamtbeitrag".into());
        row[5] = Cell::Text("Versicherungsnehmer".into());
        row[6] = Cell::Text("Sparte".into());
        row[7] = Cell::Text("Vertragsbeginn".into());
        row
    }

    fn data_row(vsnr: &str, consultant: &str, status: &str, xempus_id: &str) -> Vec<Cell> {
        let mut row = vec![Cell::Empty; 40];
        row[0] = Cell::Text(vsnr.into());
        row[1] = Cell::Text(consultant.into());
        row[2] = Cell::Text(status.into());
        row[3] = Cell::Text("Allianz".into());
        row[4] = Cell::Text("150,00".into());
        row[5] = Cell::Text("Mustermann Max".into());
        row[6] = Cell::Text("bAV".into());
        row[7] = Cell::Text("01.01.2025".into());
        if !xempus_id.is_empty() {
            row[column_index("AM")] = Cell::Text(xempus_id.into());
        }
        row
    }

    fn parse(rows: Vec<Vec<Cell>>) -> XempusParseResult {
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        parse_rows(slices.iter().copied())
    }

    #[test]
    fn test_detect_columns_by_keyword() {
        let columns = detect_columns(&header());
        assert_eq!(columns.get("vsnr"), Some(&0));
        assert_eq!(columns.get("consultant"), Some(&1));
        assert_eq!(columns.get("status"), Some(&2));
        assert_eq!(columns.get("premium"), Some(&4));
        assert_eq!(columns.get("inception"), Some(&7));
    }

    #[test]
    fn test_parse_contract_row() {
        let result = parse(vec![
            header(),
            data_row("123/456", "Schmidt, Anna", "abgeschlossen", "X-99"),
        ]);
        assert_eq!(result.rows.len(), 1);
        let row = &result.rows[0];
        assert_eq!(row.vsnr, "123/456");
        assert_eq!(row.vsnr_normalized, "123456");
        assert_eq!(row.status, ContractStatus::Concluded);
        assert_eq!(row.consultant_name.as_deref(), Some("Schmidt, Anna"));
        assert_eq!(row.premium, Some(Cents(15_000)));
        assert_eq!(row.xempus_id.as_deref(), Some("X-99"));
        assert_eq!(
            row.inception,
            NaiveDate::from_ymd_opt(2025, 1, 1)
        );
    }

    #[test]
    fn test_status_mapping_total() {
        assert_eq!(map_status("abgeschlossen"), Some(ContractStatus::Concluded));
        assert_eq!(map_status("Policiert"), Some(ContractStatus::Concluded));
        assert_eq!(map_status("storniert"), Some(ContractStatus::Cancelled));
        assert_eq!(map_status("Angebot"), Some(ContractStatus::Offer));
        assert_eq!(map_status("beantragt"), Some(ContractStatus::Applied));
        assert_eq!(map_status("unberaten"), Some(ContractStatus::Open));
        assert_eq!(map_status("entscheidung ausstehend"), Some(ContractStatus::Open));
        assert_eq!(map_status("something new"), Some(ContractStatus::Open));
        assert_eq!(map_status("nicht gewünscht"), None);
        assert_eq!(map_status("nicht gewuenscht"), None);
    }

    #[test]
    fn test_unwanted_rows_skipped() {
        let result = parse(vec![
            header(),
            data_row("123", "B", "nicht gewünscht", ""),
            data_row("456", "B", "offen", ""),
        ]);
        assert_eq!(result.total_rows, 2);
        assert_eq!(result.skipped_rows, 1);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].vsnr, "456");
    }

    #[test]
    fn test_empty_vsnr_kept_when_portal_id_present() {
        let result = parse(vec![
            header(),
            data_row("", "B", "beantragt", "X-1"),
            data_row("", "B", "beantragt", ""),
        ]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].xempus_id.as_deref(), Some("X-1"));
        assert_eq!(result.skipped_rows, 1);
    }
}
