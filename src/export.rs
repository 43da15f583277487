//! Export writer: append flattened rows to an xlsx workbook.
//!
//! ## Why rewrite instead of edit in place?
//!
//! `calamine` reads xlsx, `rust_xlsxwriter` writes it; neither edits an
//! existing file. Appending therefore means: read every sheet's values, write a
//! fresh workbook with the old rows followed by the new ones, and swap it in
//! with an atomic rename. Cell values and sheet order survive, and date or
//! duration cells are written back as dates and durations with a standard
//! number format. Other cell styling, column widths and formulas of the
//! previous file do not survive.
//!
//! The export sheet is matched case-insensitively, as Excel does.
//!
//! A failed export never touches the destination: the workbook is saved to a
//! temp file in the same directory and only renamed over the original once
//! fully written.

use crate::error::InvoiceError;
use crate::output::FlatRow;
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sheet the rows are appended to.
pub const EXPORT_SHEET: &str = "Sheet1";

/// Placeholder written for missing or null values.
pub const MISSING_VALUE: &str = "NA";

/// Columns of the export sheet, in order. Each must be a [`FlatRow`] column.
pub const EXPORT_COLUMNS: [&str; 14] = [
    "Invoice Date",
    "Invoice No",
    "Supplier Name",
    "GSTIN/UIN",
    "Consignor From Name",
    "Consignor From GSTIN",
    "Item Name",
    "HSN Code",
    "QTY",
    "Rate",
    "Batch No",
    "Exp Date",
    "Amount",
    "Narration",
];

/// What [`save_rows`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    /// Rows appended by this call (header excluded).
    pub rows_written: usize,
    /// Rows already in the sheet before this call, header included.
    pub existing_rows: usize,
    /// `true` when the file did not exist before.
    pub created: bool,
    /// `true` when a header row was written by this call.
    pub header_written: bool,
}

/// A cell value read back from an existing workbook.
#[derive(Debug, Clone, PartialEq)]
enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    /// Fraction of a day with no date part.
    TimeOfDay(f64),
    /// Serial days, as stored by Excel.
    Duration(f64),
}

impl From<&Data> for CellValue {
    fn from(cell: &Data) -> Self {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) if dt.is_duration() => CellValue::Duration(dt.as_f64()),
            Data::DateTime(dt) if (0.0..1.0).contains(&dt.as_f64()) => {
                CellValue::TimeOfDay(dt.as_f64())
            }
            Data::DateTime(dt) => dt
                .as_datetime()
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Number(dt.as_f64())),
            Data::DateTimeIso(s) => parse_iso_datetime(s)
                .map(CellValue::DateTime)
                .unwrap_or_else(|| CellValue::Text(s.clone())),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl From<Option<&Value>> for CellValue {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => CellValue::Text(MISSING_VALUE.to_string()),
            Some(Value::String(s)) => CellValue::Text(s.clone()),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(f) => CellValue::Number(f),
                None => CellValue::Text(n.to_string()),
            },
            Some(Value::Bool(b)) => CellValue::Bool(*b),
            Some(other) => CellValue::Text(other.to_string()),
        }
    }
}

fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    s.parse::<NaiveDateTime>()
        .ok()
        .or_else(|| s.parse::<NaiveDate>().ok().map(|d| d.and_time(NaiveTime::MIN)))
}

type SheetRows = Vec<Vec<CellValue>>;

fn is_export_sheet(name: &str) -> bool {
    name.eq_ignore_ascii_case(EXPORT_SHEET)
}

/// Append `rows` to the export sheet of the workbook at `path`.
///
/// * Missing file ⇒ created with a header row.
/// * Existing file ⇒ existing rows kept, new rows start after the last
///   populated row, header not repeated. A workbook without the export sheet
///   gets one (with header) appended after its other sheets.
/// * Missing/null values ⇒ [`MISSING_VALUE`].
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn save_rows(path: impl AsRef<Path>, rows: &[FlatRow]) -> Result<ExportSummary, InvoiceError> {
    let path = path.as_ref();
    let fail = |detail: String| InvoiceError::ExportFailed {
        path: path.to_path_buf(),
        detail,
    };

    let created = !path.exists();
    let mut sheets = if created {
        Vec::new()
    } else {
        read_sheets(path).map_err(fail)?
    };

    if !sheets.iter().any(|(n, _)| is_export_sheet(n)) {
        sheets.push((EXPORT_SHEET.to_string(), Vec::new()));
    }
    let mut existing_rows = 0;
    let mut header_written = false;
    if let Some((_, data)) = sheets.iter_mut().find(|(n, _)| is_export_sheet(n)) {
        existing_rows = data.len();
        // Blank sheet: start with the header, like a new file.
        if data.is_empty() {
            data.push(header_cells());
            header_written = true;
        }
        data.extend(rows.iter().map(export_cells));
    }

    write_atomically(path, &sheets).map_err(fail)?;

    info!(
        "Exported {} rows to {} ({})",
        rows.len(),
        path.display(),
        if created { "new file" } else { "appended" }
    );

    Ok(ExportSummary {
        path: path.to_path_buf(),
        rows_written: rows.len(),
        existing_rows,
        created,
        header_written,
    })
}

fn header_cells() -> Vec<CellValue> {
    EXPORT_COLUMNS
        .iter()
        .map(|c| CellValue::Text(c.to_string()))
        .collect()
}

fn export_cells(row: &FlatRow) -> Vec<CellValue> {
    EXPORT_COLUMNS
        .iter()
        .map(|column| CellValue::from(row.get(column)))
        .collect()
}

/// Every sheet's values, trailing empty rows dropped.
fn read_sheets(path: &Path) -> Result<Vec<(String, SheetRows)>, String> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| format!("could not open existing workbook: {e}"))?;

    let names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| format!("could not read sheet '{name}': {e}"))?;

        // calamine ranges start at the first used cell; pad back to A1.
        let (row_off, col_off) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        let mut data: SheetRows = vec![Vec::new(); row_off];
        for row in range.rows() {
            let mut cells = vec![CellValue::Empty; col_off];
            cells.extend(row.iter().map(CellValue::from));
            data.push(cells);
        }
        while data
            .last()
            .is_some_and(|r| r.iter().all(|c| *c == CellValue::Empty))
        {
            data.pop();
        }
        debug!("Read sheet '{}' with {} rows", name, data.len());
        sheets.push((name, data));
    }
    Ok(sheets)
}

fn write_atomically(path: &Path, sheets: &[(String, SheetRows)]) -> Result<(), String> {
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(name)
            .map_err(|e| format!("invalid sheet name '{name}': {e}"))?;
        write_sheet(worksheet, rows).map_err(|e| format!("sheet '{name}': {e}"))?;
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| format!("could not create {}: {e}", dir.display()))?;

    // Sibling temp file so the final rename stays on one filesystem.
    let tmp = tempfile::Builder::new()
        .prefix(".invoice2xlsx-")
        .suffix(".xlsx")
        .tempfile_in(&dir)
        .map_err(|e| format!("could not create temp file: {e}"))?;

    workbook
        .save(tmp.path())
        .map_err(|e| format!("could not write workbook: {e}"))?;

    tmp.persist(path)
        .map_err(|e| format!("could not replace destination: {}", e.error))?;
    Ok(())
}

fn write_sheet(worksheet: &mut Worksheet, rows: &[Vec<CellValue>]) -> Result<(), XlsxError> {
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let datetime_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
    let time_format = Format::new().set_num_format("hh:mm:ss");
    let duration_format = Format::new().set_num_format("[h]:mm:ss");

    for (r, cells) in rows.iter().enumerate() {
        let row = r as u32;
        for (c, cell) in cells.iter().enumerate() {
            let col = c as u16;
            match cell {
                CellValue::Empty => {}
                CellValue::Text(s) => {
                    worksheet.write_string(row, col, s)?;
                }
                CellValue::Number(n) => {
                    worksheet.write_number(row, col, *n)?;
                }
                CellValue::Bool(b) => {
                    worksheet.write_boolean(row, col, *b)?;
                }
                CellValue::DateTime(dt) => {
                    let format = if dt.time() == NaiveTime::MIN {
                        &date_format
                    } else {
                        &datetime_format
                    };
                    worksheet.write_datetime_with_format(row, col, dt, format)?;
                }
                CellValue::TimeOfDay(fraction) => {
                    worksheet.write_number_with_format(row, col, *fraction, &time_format)?;
                }
                CellValue::Duration(days) => {
                    worksheet.write_number_with_format(row, col, *days, &duration_format)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RowPolicy;
    use crate::output::StructuredInvoice;
    use crate::pipeline::flatten::{flatten, LINE_ITEM_FIELDS};
    use rust_xlsxwriter::ExcelDateTime;
    use serde_json::json;

    fn rows_for(invoice_no: &str, items: usize) -> Vec<FlatRow> {
        let line_items: Vec<Value> = (0..items)
            .map(|i| json!({"itemName": format!("Item {i}"), "qty": i + 1, "rate": 12.5}))
            .collect();
        let inv = StructuredInvoice::from_value(json!({
            "invoiceHeader": {"invoiceNo": invoice_no, "invoiceDate": "01-04-2024"},
            "supplierDetails": {"supplierName": "Acme Traders"},
            "lineItems": line_items,
        }))
        .unwrap();
        flatten(&inv, RowPolicy::SynthesizeEmpty)
    }

    fn read_back(path: &Path) -> Vec<Vec<Data>> {
        let mut wb = open_workbook_auto(path).unwrap();
        let range = wb.worksheet_range(EXPORT_SHEET).unwrap();
        range.rows().map(|r| r.to_vec()).collect()
    }

    #[test]
    fn every_export_column_is_a_flat_row_column() {
        let row = &rows_for("X", 1)[0];
        for column in EXPORT_COLUMNS {
            assert!(row.has_column(column), "unknown export column {column}");
        }
        assert!(LINE_ITEM_FIELDS.iter().any(|(_, c)| *c == "QTY"));
    }

    #[test]
    fn new_file_gets_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");

        let summary = save_rows(&path, &rows_for("INV-1", 2)).unwrap();
        assert!(summary.created);
        assert!(summary.header_written);
        assert_eq!(summary.rows_written, 2);

        let rows = read_back(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Data::String("Invoice Date".into()));
        assert_eq!(rows[0][13], Data::String("Narration".into()));
        assert_eq!(rows[1][1], Data::String("INV-1".into()));
        assert_eq!(rows[2][6], Data::String("Item 1".into()));
    }

    #[test]
    fn append_keeps_rows_and_does_not_repeat_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");

        save_rows(&path, &rows_for("INV-1", 2)).unwrap();
        let summary = save_rows(&path, &rows_for("INV-2", 3)).unwrap();
        assert!(!summary.created);
        assert!(!summary.header_written);
        assert_eq!(summary.existing_rows, 3);

        let rows = read_back(&path);
        assert_eq!(rows.len(), 1 + 2 + 3);
        let headers = rows
            .iter()
            .filter(|r| r[0] == Data::String("Invoice Date".into()))
            .count();
        assert_eq!(headers, 1);
        assert_eq!(rows[2][1], Data::String("INV-1".into()));
        assert_eq!(rows[3][1], Data::String("INV-2".into()));
    }

    #[test]
    fn missing_values_become_na_and_numbers_stay_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        save_rows(&path, &rows_for("INV-3", 1)).unwrap();

        let rows = read_back(&path);
        let data = &rows[1];
        // GSTIN/UIN never supplied.
        assert_eq!(data[3], Data::String(MISSING_VALUE.into()));
        // QTY 1, Rate 12.5
        assert!(matches!(data[8], Data::Float(f) if f == 1.0) || data[8] == Data::Int(1));
        assert_eq!(data[9], Data::Float(12.5));
    }

    #[test]
    fn synthetic_row_exports_as_all_na_line_item() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        save_rows(&path, &rows_for("INV-4", 0)).unwrap();

        let rows = read_back(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], Data::String("INV-4".into()));
        assert_eq!(rows[1][6], Data::String(MISSING_VALUE.into()));
    }

    #[test]
    fn unreadable_destination_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();

        let err = save_rows(&path, &rows_for("INV-5", 1)).unwrap_err();
        assert!(matches!(err, InvoiceError::ExportFailed { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"not a zip archive");
    }

    #[test]
    fn workbook_without_export_sheet_gains_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name("Notes").unwrap();
        ws.write_string(0, 0, "keep me").unwrap();
        wb.save(&path).unwrap();

        let summary = save_rows(&path, &rows_for("INV-6", 1)).unwrap();
        assert!(summary.header_written);

        let mut wb = open_workbook_auto(&path).unwrap();
        assert_eq!(wb.sheet_names().to_vec(), vec!["Notes", EXPORT_SHEET]);
        let notes = wb.worksheet_range("Notes").unwrap();
        assert_eq!(notes.get((0, 0)), Some(&Data::String("keep me".into())));
    }

    #[test]
    fn append_keeps_existing_dates_as_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dated.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name(EXPORT_SHEET).unwrap();
        ws.write_string(0, 0, "Invoice Date").unwrap();
        let date = ExcelDateTime::from_ymd(2024, 4, 1).unwrap();
        let dd_mm = Format::new().set_num_format("dd/mm/yyyy");
        ws.write_datetime_with_format(1, 0, &date, &dd_mm).unwrap();
        let elapsed = ExcelDateTime::from_hms(30, 15, 0).unwrap();
        let hours = Format::new().set_num_format("[h]:mm");
        ws.write_datetime_with_format(1, 1, &elapsed, &hours).unwrap();
        wb.save(&path).unwrap();

        save_rows(&path, &rows_for("INV-7", 1)).unwrap();
        save_rows(&path, &[]).unwrap();

        let rows = read_back(&path);
        match &rows[1][0] {
            Data::DateTime(dt) => {
                assert!(dt.is_datetime());
                assert_eq!(dt.as_f64(), 45383.0);
            }
            other => panic!("date cell degraded to {other:?}"),
        }
        match &rows[1][1] {
            Data::DateTime(dt) => {
                assert!(dt.is_duration());
                assert!((dt.as_f64() - 30.25 / 24.0).abs() < 1e-9);
            }
            other => panic!("duration cell degraded to {other:?}"),
        }
        assert_eq!(rows[2][1], Data::String("INV-7".into()));
    }

    #[test]
    fn export_sheet_name_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lower.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name("sheet1").unwrap();
        for (c, column) in EXPORT_COLUMNS.iter().enumerate() {
            ws.write_string(0, c as u16, *column).unwrap();
        }
        wb.save(&path).unwrap();

        let summary = save_rows(&path, &rows_for("INV-8", 2)).unwrap();
        assert!(!summary.header_written);
        assert_eq!(summary.existing_rows, 1);

        let mut wb = open_workbook_auto(&path).unwrap();
        assert_eq!(wb.sheet_names().to_vec(), vec!["sheet1"]);
        let range = wb.worksheet_range("sheet1").unwrap();
        assert_eq!(range.height(), 3);
        assert_eq!(range.get((1, 1)), Some(&Data::String("INV-8".into())));
    }

    #[test]
    fn iso_datetime_strings_are_parsed() {
        assert_eq!(
            CellValue::from(&Data::DateTimeIso("2024-04-01".into())),
            CellValue::DateTime(
                NaiveDate::from_ymd_opt(2024, 4, 1)
                    .unwrap()
                    .and_time(NaiveTime::MIN)
            )
        );
        assert_eq!(
            CellValue::from(&Data::DateTimeIso("soon".into())),
            CellValue::Text("soon".into())
        );
    }
}
