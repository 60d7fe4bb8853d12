use anyhow::{anyhow, Result};
use std::path::Path;
use umya_spreadsheet::{Spreadsheet, Worksheet};

use crate::project::{FinanceReport, TradeUpload, TradeUploadRow, TRADE_UPLOAD_HEADERS};

pub const ALLOCATION_SHEET: &str = "Allocations";
pub const RULL_SHEET: &str = "Rull allocations";
pub const TEMP_SHEET: &str = "Temp allocations";
pub const FINANCE_SHEET: &str = "Input Front";

const TRADE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";
const VALUE_DATE_FORMAT: &str = "%Y-%m-%d";
const FINANCE_DATE_FORMAT: &str = "%Y.%m.%d";

// Variable columns of the finance input table: D through I
const FINANCE_FIRST_COL: u32 = 4;
const FINANCE_LAST_COL: u32 = 9;
const FINANCE_FIRST_DATA_ROW: u32 = 2;

/// Builds the trade-upload workbook in memory: one sheet per category,
/// each with the fixed header row.
pub fn build_trade_upload_book(upload: &TradeUpload) -> Result<Spreadsheet> {
    let mut book = umya_spreadsheet::new_file();

    let primary_sheet = book
        .get_sheet_mut(&0)
        .ok_or_else(|| anyhow!("New workbook has no default sheet"))?;
    primary_sheet.set_name(ALLOCATION_SHEET);
    write_category_sheet(primary_sheet, &upload.primary);

    let rull_sheet = book
        .new_sheet(RULL_SHEET)
        .map_err(|e| anyhow!("Cannot create sheet '{}': {}", RULL_SHEET, e))?;
    write_category_sheet(rull_sheet, &upload.rull);

    let temp_sheet = book
        .new_sheet(TEMP_SHEET)
        .map_err(|e| anyhow!("Cannot create sheet '{}': {}", TEMP_SHEET, e))?;
    write_category_sheet(temp_sheet, &upload.temp);

    Ok(book)
}

/// Writes the trade-upload workbook to a new file.
pub fn write_trade_upload(upload: &TradeUpload, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let book = build_trade_upload_book(upload)?;
    umya_spreadsheet::writer::xlsx::write(&book, path)
        .map_err(|e| anyhow!("Cannot write trade upload to {}: {}", path.display(), e))
}

fn write_category_sheet(sheet: &mut Worksheet, rows: &[TradeUploadRow]) {
    for (idx, header) in TRADE_UPLOAD_HEADERS.iter().enumerate() {
        sheet.get_cell_mut((idx as u32 + 1, 1)).set_value(*header);
    }

    for (i, row) in rows.iter().enumerate() {
        let r = i as u32 + 2;
        sheet.get_cell_mut((1, r)).set_value_number(row.book as f64);
        sheet
            .get_cell_mut((2, r))
            .set_value_number(row.counterparty as f64);
        sheet
            .get_cell_mut((3, r))
            .set_value_number(row.security as f64);
        sheet
            .get_cell_mut((4, r))
            .set_value_number(row.shares as f64);
        sheet.get_cell_mut((5, r)).set_value(row.price.clone());
        sheet
            .get_cell_mut((6, r))
            .set_value(row.trade_date.format(TRADE_DATE_FORMAT).to_string());
        sheet
            .get_cell_mut((7, r))
            .set_value(row.value_date.format(VALUE_DATE_FORMAT).to_string());
        sheet.get_cell_mut((8, r)).set_value(row.currency.clone());
        sheet.get_cell_mut((9, r)).set_value(row.comments.clone());
        // An absent fee stays a blank cell, never a written 0
        if let Some(fee) = row.commitment_fee {
            sheet.get_cell_mut((10, r)).set_value_number(fee);
        }
        sheet
            .get_cell_mut((11, r))
            .set_value(row.fee_currency.clone());
    }
}

/// Applies the finance report to an already-loaded finance workbook.
///
/// Previously written data rows in the variable columns are cleared first,
/// so re-running against the same target leaves no stale rows. The target's
/// own headers and formulas are untouched.
pub fn apply_finance_report(report: &FinanceReport, book: &mut Spreadsheet) -> Result<()> {
    let sheet = book
        .get_sheet_by_name_mut(FINANCE_SHEET)
        .ok_or_else(|| anyhow!("Finance workbook has no sheet named '{}'", FINANCE_SHEET))?;

    let last_row = sheet.get_highest_row();
    for row in FINANCE_FIRST_DATA_ROW..=last_row {
        for col in FINANCE_FIRST_COL..=FINANCE_LAST_COL {
            sheet.get_cell_mut((col, row)).set_value("");
        }
    }

    sheet
        .get_cell_mut("B1")
        .set_value(report.header.preparer.clone());
    sheet
        .get_cell_mut("B2")
        .set_value(report.header.deal.clone());
    sheet
        .get_cell_mut("B3")
        .set_value(report.header.project_id.clone());
    sheet
        .get_cell_mut("B4")
        .set_value(report.header.isin.clone());
    sheet.get_cell_mut("B5").set_value(
        report
            .header
            .trade_date
            .format(FINANCE_DATE_FORMAT)
            .to_string(),
    );
    sheet
        .get_cell_mut("B6")
        .set_value(report.header.currency.clone());

    for (i, row) in report.rows.iter().enumerate() {
        let r = i as u32 + FINANCE_FIRST_DATA_ROW;
        sheet
            .get_cell_mut((4, r))
            .set_value_number(row.inferno_nr as f64);
        sheet
            .get_cell_mut((5, r))
            .set_value(row.client_name.clone());
        sheet.get_cell_mut((6, r)).set_value(row.broker_id.clone());
        sheet
            .get_cell_mut((8, r))
            .set_value_number(row.gross_amount);
        sheet
            .get_cell_mut((9, r))
            .set_value_number(row.finance_quantity as f64);
    }

    clear_cached_formula_values(book);

    Ok(())
}

/// Drops the cached result of every formula cell while keeping the formula,
/// so the workbook recomputes from the rewritten rows instead of showing
/// stale cached values.
fn clear_cached_formula_values(book: &mut Spreadsheet) {
    for sheet in book.get_sheet_collection_mut() {
        for cell in sheet.get_cell_collection_mut() {
            if cell.is_formula() {
                let formula = cell.get_formula().to_string();
                cell.set_blank();
                cell.set_formula(formula);
            }
        }
    }
}

/// Opens the pre-existing finance workbook, applies the report and saves
/// it back in place. The target's formulas are kept but their cached
/// results are dropped, so they recalculate when the workbook is opened.
pub fn update_finance_workbook(report: &FinanceReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut book = umya_spreadsheet::reader::xlsx::read(path)
        .map_err(|e| anyhow!("Cannot open finance workbook {}: {}", path.display(), e))?;
    apply_finance_report(report, &mut book)?;
    umya_spreadsheet::writer::xlsx::write(&book, path)
        .map_err(|e| anyhow!("Cannot save finance workbook {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{FinanceHeader, FinanceRow};
    use chrono::NaiveDate;

    fn sample_row(shares: i64, fee: Option<f64>) -> TradeUploadRow {
        TradeUploadRow {
            book: 7310,
            counterparty: 900101,
            security: 583920,
            shares,
            price: "0.995000/583920/NOK/PC".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2024, 3, 11)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
            value_date: NaiveDate::from_ymd_opt(2024, 3, 13).unwrap(),
            currency: "NOK".to_string(),
            comments: "settle t+2".to_string(),
            commitment_fee: fee,
            fee_currency: "NOK".to_string(),
        }
    }

    fn finance_report(row_count: usize) -> FinanceReport {
        let rows = (0..row_count)
            .map(|i| FinanceRow {
                inferno_nr: 900101 + i as i64,
                client_name: format!("Client {}", i + 1),
                broker_id: "BRK1".to_string(),
                gross_amount: 1000.0 * (i + 1) as f64,
                finance_quantity: 100 * (i + 1) as i64,
            })
            .collect();

        FinanceReport {
            header: FinanceHeader {
                preparer: "Kari Nordmann".to_string(),
                deal: "Example Corp refinancing".to_string(),
                project_id: "P-1042".to_string(),
                isin: "NO0012345678".to_string(),
                trade_date: NaiveDate::from_ymd_opt(2024, 3, 11)
                    .unwrap()
                    .and_hms_opt(14, 30, 0)
                    .unwrap(),
                currency: "NOK".to_string(),
            },
            rows,
        }
    }

    fn finance_book() -> Spreadsheet {
        let mut book = umya_spreadsheet::new_file();
        let sheet = book.get_sheet_mut(&0).unwrap();
        sheet.set_name(FINANCE_SHEET);
        sheet.get_cell_mut("D1").set_value("Inferno");
        sheet.get_cell_mut("E1").set_value("Client");
        book
    }

    #[test]
    fn test_trade_upload_book_layout() {
        let upload = TradeUpload {
            primary: vec![sample_row(-100, Some(2500.0))],
            rull: vec![sample_row(50, None)],
            temp: vec![],
        };

        let book = build_trade_upload_book(&upload).unwrap();

        let primary = book.get_sheet_by_name(ALLOCATION_SHEET).unwrap();
        assert_eq!(primary.get_value("A1"), "Book");
        assert_eq!(primary.get_value("K1"), "Fee Currency");
        assert_eq!(primary.get_value("A2"), "7310");
        assert_eq!(primary.get_value("D2"), "-100");
        assert_eq!(primary.get_value("E2"), "0.995000/583920/NOK/PC");
        assert_eq!(primary.get_value("H2"), "NOK");
        assert_eq!(primary.get_value("J2"), "2500");

        let rull = book.get_sheet_by_name(RULL_SHEET).unwrap();
        assert_eq!(rull.get_value("D2"), "50");
        // Absent fee renders blank
        assert_eq!(rull.get_value("J2"), "");

        let temp = book.get_sheet_by_name(TEMP_SHEET).unwrap();
        assert_eq!(temp.get_value("A1"), "Book");
        assert_eq!(temp.get_value("A2"), "");
    }

    #[test]
    fn test_finance_apply_writes_rows_and_header() {
        let mut book = finance_book();
        apply_finance_report(&finance_report(2), &mut book).unwrap();

        let sheet = book.get_sheet_by_name(FINANCE_SHEET).unwrap();
        assert_eq!(sheet.get_value("B1"), "Kari Nordmann");
        assert_eq!(sheet.get_value("B2"), "Example Corp refinancing");
        assert_eq!(sheet.get_value("B3"), "P-1042");
        assert_eq!(sheet.get_value("B4"), "NO0012345678");
        assert_eq!(sheet.get_value("B5"), "2024.03.11");
        assert_eq!(sheet.get_value("B6"), "NOK");

        assert_eq!(sheet.get_value("D2"), "900101");
        assert_eq!(sheet.get_value("E2"), "Client 1");
        assert_eq!(sheet.get_value("F2"), "BRK1");
        assert_eq!(sheet.get_value("H2"), "1000");
        assert_eq!(sheet.get_value("I2"), "100");
        assert_eq!(sheet.get_value("D3"), "900102");

        // The target's own header row stays
        assert_eq!(sheet.get_value("D1"), "Inferno");
    }

    #[test]
    fn test_finance_rerun_clears_stale_rows() {
        let mut book = finance_book();
        apply_finance_report(&finance_report(3), &mut book).unwrap();
        apply_finance_report(&finance_report(1), &mut book).unwrap();

        let sheet = book.get_sheet_by_name(FINANCE_SHEET).unwrap();
        assert_eq!(sheet.get_value("D2"), "900101");
        // Rows 3 and 4 from the first run are gone
        for addr in ["D3", "E3", "H3", "I3", "D4", "E4", "H4", "I4"] {
            assert_eq!(sheet.get_value(addr), "", "stale value left in {addr}");
        }
    }

    #[test]
    fn test_finance_formula_caches_are_invalidated() {
        let mut book = finance_book();
        {
            let sheet = book.get_sheet_by_name_mut(FINANCE_SHEET).unwrap();
            // A total over the quantity column, carrying a cached result
            // from an earlier run
            let cell = sheet.get_cell_mut("K1");
            cell.set_formula("SUM(I2:I9)");
            cell.set_value_number(999.0);
        }

        apply_finance_report(&finance_report(1), &mut book).unwrap();

        let sheet = book.get_sheet_by_name(FINANCE_SHEET).unwrap();
        let cell = sheet.get_cell("K1").unwrap();
        assert_eq!(cell.get_formula(), "SUM(I2:I9)");
        // The stale 999 must be gone so the sum recomputes on open
        assert_eq!(sheet.get_value("K1"), "");
    }

    #[test]
    fn test_finance_missing_sheet_is_an_error() {
        let mut book = umya_spreadsheet::new_file();
        let err = apply_finance_report(&finance_report(1), &mut book).unwrap_err();
        assert!(format!("{err:#}").contains(FINANCE_SHEET));
    }
}
