pub mod project;
pub mod workbook;

pub use crate::project::{
    price_string, project_finance, project_trade_upload, FinanceHeader, FinanceReport, FinanceRow,
    TradeUpload, TradeUploadOptions, TradeUploadRow, TRADE_UPLOAD_HEADERS,
};
pub use crate::workbook::{
    apply_finance_report, build_trade_upload_book, update_finance_workbook, write_trade_upload,
    ALLOCATION_SHEET, FINANCE_SHEET, RULL_SHEET, TEMP_SHEET,
};
