use chrono::{NaiveDate, NaiveDateTime};

use models::{Allocation, AllocationCategory, ParsedRun};

/// Column headers of every category sheet in the trade-upload workbook,
/// in the fixed order the downstream upload expects.
pub const TRADE_UPLOAD_HEADERS: [&str; 11] = [
    "Book",
    "Counterparty",
    "Primary Security (GUI)",
    "Number of Shares",
    "Price",
    "Trade Date",
    "Value Date",
    "Settlement Currency",
    "Back office comments",
    "Commitment Fee",
    "Fee Currency",
];

/// One row of the trade-upload sheet, already carrying the category's sign
/// convention and the synthesized price string.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeUploadRow {
    pub book: i64,
    pub counterparty: i64,
    pub security: i64,
    pub shares: i64,
    pub price: String,
    pub trade_date: NaiveDateTime,
    pub value_date: NaiveDate,
    pub currency: String,
    pub comments: String,
    /// `None` renders as a blank cell, never as a written 0.
    pub commitment_fee: Option<f64>,
    pub fee_currency: String,
}

#[derive(Debug, Clone)]
pub struct TradeUploadOptions {
    /// Pot accounts are not uploaded to the trading system; they only
    /// appear in the finance report.
    pub exclude_pot_accounts: bool,
}

impl Default for TradeUploadOptions {
    fn default() -> Self {
        TradeUploadOptions {
            exclude_pot_accounts: true,
        }
    }
}

/// The three category row blocks of the trade-upload workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeUpload {
    pub primary: Vec<TradeUploadRow>,
    pub rull: Vec<TradeUploadRow>,
    pub temp: Vec<TradeUploadRow>,
}

/// Composite price string in the downstream upload format:
/// percent-of-par price, settlement id and currency, e.g.
/// `0.125000/583920/NOK/PC` for price 12.5.
pub fn price_string(price: f64, smid: i64, currency: &str) -> String {
    format!("{:.6}/{}/{}/PC", price / 100.0, smid, currency)
}

fn upload_row(alloc: &Allocation) -> TradeUploadRow {
    // Primary and temp rows book allocations out, so their quantities flip
    // sign; rull rows represent inbound re-allocation and keep theirs.
    let shares = match alloc.category {
        AllocationCategory::Primary | AllocationCategory::Temp => -alloc.quantity,
        AllocationCategory::Rull => alloc.quantity,
    };

    TradeUploadRow {
        book: alloc.book,
        counterparty: alloc.inferno_nr,
        security: alloc.smid,
        shares,
        price: price_string(alloc.price, alloc.smid, &alloc.currency),
        trade_date: alloc.trade_date,
        value_date: alloc.value_date,
        currency: alloc.currency.clone(),
        comments: alloc.back_office_comments.clone(),
        commitment_fee: alloc.commitment_fee,
        fee_currency: alloc.fee_currency.clone(),
    }
}

/// Projects a parsed run into the three trade-upload row blocks, in list
/// order. Pot-account filtering applies to the primary block only.
pub fn project_trade_upload(run: &ParsedRun, options: &TradeUploadOptions) -> TradeUpload {
    let primary = run
        .primary
        .iter()
        .filter(|a| !(options.exclude_pot_accounts && a.is_pot_account()))
        .map(upload_row)
        .collect();
    let rull = run.rull.iter().map(upload_row).collect();
    let temp = run.temp.iter().map(upload_row).collect();

    TradeUpload {
        primary,
        rull,
        temp,
    }
}

/// Run-level block written once at the top of the finance input table.
#[derive(Debug, Clone, PartialEq)]
pub struct FinanceHeader {
    pub preparer: String,
    pub deal: String,
    pub project_id: String,
    pub isin: String,
    pub trade_date: NaiveDateTime,
    pub currency: String,
}

/// One finance input row, derived from a primary allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FinanceRow {
    pub inferno_nr: i64,
    pub client_name: String,
    pub broker_id: String,
    /// finance_quantity × percent-of-par price.
    pub gross_amount: f64,
    pub finance_quantity: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinanceReport {
    pub header: FinanceHeader,
    pub rows: Vec<FinanceRow>,
}

/// Projects the finance report from a parsed run. Only primary allocations
/// are reported; the run-level identifiers come straight from the header
/// block, so an empty primary list still yields a complete header.
pub fn project_finance(run: &ParsedRun) -> FinanceReport {
    let header = FinanceHeader {
        preparer: run.metadata.preparer.clone(),
        deal: run.metadata.deal.clone(),
        project_id: run.metadata.project_id.clone(),
        isin: run.context.primary.isin.clone(),
        trade_date: run.context.trade_date,
        currency: run.context.primary.currency.clone(),
    };

    let rows = run
        .primary
        .iter()
        .map(|alloc| FinanceRow {
            inferno_nr: alloc.inferno_nr,
            client_name: alloc.client_name.clone(),
            broker_id: alloc.broker_id.clone(),
            gross_amount: alloc.finance_quantity as f64 * alloc.price,
            finance_quantity: alloc.finance_quantity,
        })
        .collect();

    FinanceReport { header, rows }
}
