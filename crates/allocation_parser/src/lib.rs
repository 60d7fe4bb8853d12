use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::path::Path;

use models::{Allocation, AllocationCategory, CategoryTerms, ParsedRun, RunContext, RunMetadata};

/// Logical columns of the allocation table, in their expected sheet order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Inferno,
    Investor,
    AccountType,
    PrimaryQty,
    RullQty,
    TempQty,
    Broker,
    Fee,
    Comment,
    FinanceQty,
    BrokerId,
}

impl Column {
    pub const ALL: [Column; 11] = [
        Column::Inferno,
        Column::Investor,
        Column::AccountType,
        Column::PrimaryQty,
        Column::RullQty,
        Column::TempQty,
        Column::Broker,
        Column::Fee,
        Column::Comment,
        Column::FinanceQty,
        Column::BrokerId,
    ];

    /// Header label the column must carry in the table header row.
    pub fn label(self) -> &'static str {
        match self {
            Column::Inferno => "Inferno",
            Column::Investor => "Investor",
            Column::AccountType => "B&D",
            Column::PrimaryQty => "Allocation",
            Column::RullQty => "Rull allocation",
            Column::TempQty => "Temp allocation",
            Column::Broker => "Broker",
            Column::Fee => "UW fee",
            Column::Comment => "Comment",
            Column::FinanceQty => "Finance rapportering",
            Column::BrokerId => "Broker ID",
        }
    }
}

/// Column-to-field mapping for the allocation table.
///
/// Validated once per run against the actual table header row, so a moved
/// column surfaces as an explicit error instead of silently misaligned data.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    indices: [usize; 11],
}

impl Default for ColumnLayout {
    fn default() -> Self {
        ColumnLayout {
            indices: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
        }
    }
}

impl ColumnLayout {
    pub fn index(&self, column: Column) -> usize {
        let slot = match column {
            Column::Inferno => 0,
            Column::Investor => 1,
            Column::AccountType => 2,
            Column::PrimaryQty => 3,
            Column::RullQty => 4,
            Column::TempQty => 5,
            Column::Broker => 6,
            Column::Fee => 7,
            Column::Comment => 8,
            Column::FinanceQty => 9,
            Column::BrokerId => 10,
        };
        self.indices[slot]
    }

    fn validate(&self, range: &Range<Data>, header_row: usize) -> Result<()> {
        for column in Column::ALL {
            let idx = self.index(column);
            let found = cell_str(range.get_value((header_row as u32, idx as u32)))
                .unwrap_or_default()
                .trim()
                .to_string();
            if !found.eq_ignore_ascii_case(column.label()) {
                bail!(
                    "Unexpected table header in cell {}: expected '{}', found '{}'",
                    pos_to_a1(header_row, idx),
                    column.label(),
                    found
                );
            }
        }
        Ok(())
    }
}

/// One deployed layout of the input sheet: header cell coordinates, table
/// offsets and the date grammar the sheet is written in.
///
/// Sheet revisions disagree on the date grammar, so the grammar is part of
/// the schema value instead of a silent guess.
#[derive(Debug, Clone)]
pub struct SheetSchema {
    pub primary_isin: &'static str,
    pub rull_isin: &'static str,
    pub temp_isin: &'static str,
    pub primary_price: &'static str,
    pub rull_price: &'static str,
    pub temp_price: &'static str,
    pub trade_date: &'static str,
    pub value_date: &'static str,
    pub preparer: &'static str,
    pub deal: &'static str,
    pub project_id: &'static str,
    pub book: &'static str,
    pub primary_smid: &'static str,
    pub rull_smid: &'static str,
    pub temp_smid: &'static str,
    pub primary_currency: &'static str,
    pub rull_currency: &'static str,
    pub temp_currency: &'static str,
    /// Zero-based index of the table header row.
    pub table_header_row: usize,
    /// Zero-based index of the first data row.
    pub first_data_row: usize,
    pub trade_date_format: &'static str,
    pub value_date_format: &'static str,
}

impl Default for SheetSchema {
    fn default() -> Self {
        SheetSchema {
            primary_isin: "B2",
            rull_isin: "B3",
            temp_isin: "B4",
            primary_price: "B5",
            rull_price: "B6",
            temp_price: "B7",
            trade_date: "B8",
            value_date: "B9",
            preparer: "B11",
            deal: "B12",
            project_id: "B13",
            book: "E2",
            primary_smid: "E3",
            rull_smid: "E4",
            temp_smid: "E5",
            primary_currency: "F3",
            rull_currency: "F4",
            temp_currency: "F5",
            table_header_row: 15,
            first_data_row: 16,
            trade_date_format: "%m/%d/%y %H:%M",
            value_date_format: "%d-%m-%y",
        }
    }
}

impl SheetSchema {
    /// Later sheet revisions write both dates in the value-date grammar;
    /// the trade date then carries no time component.
    pub fn unified_dates() -> Self {
        SheetSchema {
            trade_date_format: "%d-%m-%y",
            value_date_format: "%d-%m-%y",
            ..SheetSchema::default()
        }
    }
}

/// Reads one allocation workbook and fans each data row out into up to
/// three category allocations (primary, rull, temp).
#[derive(Debug, Clone)]
pub struct AllocationSheetParser {
    pub schema: SheetSchema,
    pub layout: ColumnLayout,
    pub sheet_name: Option<String>,
}

impl Default for AllocationSheetParser {
    fn default() -> Self {
        AllocationSheetParser {
            schema: SheetSchema::default(),
            layout: ColumnLayout::default(),
            sheet_name: None,
        }
    }
}

impl AllocationSheetParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: SheetSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Reads a specific worksheet instead of the first one.
    pub fn with_sheet_name(mut self, name: impl Into<String>) -> Self {
        self.sheet_name = Some(name.into());
        self
    }

    /// Parse a single workbook file into one allocation run.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<ParsedRun> {
        let path = path.as_ref();
        let mut workbook: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("Cannot open {}", path.display()))?;

        let sheet_name = match &self.sheet_name {
            Some(name) => name.clone(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("No sheets found in {}", path.display()))?,
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .with_context(|| format!("Cannot read sheet '{}' in {}", sheet_name, path.display()))?;

        self.parse_range(&range)
            .with_context(|| format!("Malformed input sheet '{}' in {}", sheet_name, path.display()))
    }

    /// Parse an already-loaded cell range. All header scalars are read
    /// first and fail fast; data rows are only visited afterwards.
    pub fn parse_range(&self, range: &Range<Data>) -> Result<ParsedRun> {
        let context = self.parse_context(range)?;
        let metadata = self.parse_metadata(range)?;
        self.layout.validate(range, self.schema.table_header_row)?;

        let end_row = match range.end() {
            Some((row, _)) => row as usize,
            None => bail!("Input sheet is empty"),
        };

        let mut primary = Vec::new();
        let mut rull = Vec::new();
        let mut temp = Vec::new();

        for row in self.schema.first_data_row..=end_row {
            self.parse_row(range, row, &context, &mut primary, &mut rull, &mut temp)?;
        }

        Ok(ParsedRun {
            context,
            metadata,
            primary,
            rull,
            temp,
        })
    }

    fn parse_context(&self, range: &Range<Data>) -> Result<RunContext> {
        let s = &self.schema;
        Ok(RunContext {
            book: self.header_i64(range, s.book, "Book")?,
            trade_date: self.header_trade_date(range, s.trade_date, "Trade date")?,
            value_date: self.header_value_date(range, s.value_date, "Value date")?,
            primary: CategoryTerms {
                isin: self.header_string(range, s.primary_isin, "ISIN")?,
                smid: self.header_i64(range, s.primary_smid, "SMID")?,
                price: self.header_price(range, s.primary_price, "Price")?,
                currency: self.header_string(range, s.primary_currency, "Settlement currency")?,
            },
            rull: CategoryTerms {
                isin: self.header_string(range, s.rull_isin, "Rull ISIN")?,
                smid: self.header_i64(range, s.rull_smid, "Rull SMID")?,
                price: self.header_price(range, s.rull_price, "Rull price")?,
                currency: self.header_string(range, s.rull_currency, "Rull currency")?,
            },
            temp: CategoryTerms {
                isin: self.header_string(range, s.temp_isin, "Temp ISIN")?,
                smid: self.header_i64(range, s.temp_smid, "Temp SMID")?,
                price: self.header_price(range, s.temp_price, "Temp price")?,
                currency: self.header_string(range, s.temp_currency, "Temp currency")?,
            },
        })
    }

    fn parse_metadata(&self, range: &Range<Data>) -> Result<RunMetadata> {
        let s = &self.schema;
        Ok(RunMetadata {
            preparer: self.header_string(range, s.preparer, "Preparer")?,
            deal: self.header_string(range, s.deal, "Deal")?,
            project_id: self.header_string(range, s.project_id, "Project id")?,
        })
    }

    fn parse_row(
        &self,
        range: &Range<Data>,
        row: usize,
        context: &RunContext,
        primary: &mut Vec<Allocation>,
        rull: &mut Vec<Allocation>,
        temp: &mut Vec<Allocation>,
    ) -> Result<()> {
        let get = |column: Column| -> Option<String> {
            cell_str(range.get_value((row as u32, self.layout.index(column) as u32)))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let addr = |column: Column| pos_to_a1(row, self.layout.index(column));

        // Sheets usually trail off into empty rows after the data.
        if Column::ALL.iter().all(|c| get(*c).is_none()) {
            return Ok(());
        }

        let inferno_raw = get(Column::Inferno)
            .ok_or_else(|| anyhow!("Missing Inferno number in cell {}", addr(Column::Inferno)))?;
        let inferno_nr = parse_i64(&inferno_raw).with_context(|| {
            format!("Cannot convert Inferno number in cell {}", addr(Column::Inferno))
        })?;

        let quantity = match get(Column::PrimaryQty) {
            Some(raw) => parse_i64(&raw).with_context(|| {
                format!(
                    "Cannot convert allocation quantity in cell {}",
                    addr(Column::PrimaryQty)
                )
            })?,
            None => 0,
        };

        let commitment_fee = match get(Column::Fee) {
            Some(raw) => {
                let fee = parse_f64(&raw).with_context(|| {
                    format!("Cannot convert commitment fee in cell {}", addr(Column::Fee))
                })?;
                // A written 0 means "no fee", same as a blank cell
                if fee == 0.0 {
                    None
                } else {
                    Some(fee)
                }
            }
            None => None,
        };

        let finance_quantity = match get(Column::FinanceQty) {
            Some(raw) => parse_i64(&raw).with_context(|| {
                format!(
                    "Cannot convert finance quantity in cell {}",
                    addr(Column::FinanceQty)
                )
            })?,
            None => 0,
        };

        let base = Allocation {
            category: AllocationCategory::Primary,
            isin: context.primary.isin.clone(),
            currency: context.primary.currency.clone(),
            client_name: get(Column::Investor).unwrap_or_default(),
            broker_id: get(Column::BrokerId).unwrap_or_default(),
            account_type: get(Column::AccountType).unwrap_or_default(),
            back_office_comments: get(Column::Comment).unwrap_or_default(),
            quantity,
            finance_quantity,
            inferno_nr,
            smid: context.primary.smid,
            book: context.book,
            trade_date: context.trade_date,
            value_date: context.value_date,
            price: context.primary.price,
            commitment_fee,
            fee_currency: context.primary.currency.clone(),
        };

        if let Some(raw) = get(Column::RullQty) {
            if raw != "0" {
                let qty = parse_i64(&raw).with_context(|| {
                    format!("Cannot convert rull quantity in cell {}", addr(Column::RullQty))
                })?;
                if qty != 0 {
                    rull.push(base.for_category(AllocationCategory::Rull, qty, &context.rull));
                }
            }
        }

        if let Some(raw) = get(Column::TempQty) {
            if raw != "0" {
                let qty = parse_i64(&raw).with_context(|| {
                    format!("Cannot convert temp quantity in cell {}", addr(Column::TempQty))
                })?;
                if qty != 0 {
                    temp.push(base.for_category(AllocationCategory::Temp, qty, &context.temp));
                }
            }
        }

        if base.quantity != 0 {
            primary.push(base);
        }

        Ok(())
    }

    fn header_cell(&self, range: &Range<Data>, addr: &str) -> Result<Option<String>> {
        let (row, col) = a1_to_pos(addr)?;
        Ok(cell_str(range.get_value((row, col)))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    fn header_string(&self, range: &Range<Data>, addr: &str, what: &str) -> Result<String> {
        self.header_cell(range, addr)?
            .ok_or_else(|| anyhow!("Missing {} in header cell {}", what, addr))
    }

    fn header_i64(&self, range: &Range<Data>, addr: &str, what: &str) -> Result<i64> {
        let raw = self.header_string(range, addr, what)?;
        parse_i64(&raw).with_context(|| format!("Cannot convert {} in header cell {}", what, addr))
    }

    fn header_price(&self, range: &Range<Data>, addr: &str, what: &str) -> Result<f64> {
        let raw = self.header_string(range, addr, what)?;
        raw.parse::<f64>()
            .with_context(|| format!("Cannot convert {} in header cell {}", what, addr))
    }

    fn header_trade_date(
        &self,
        range: &Range<Data>,
        addr: &str,
        what: &str,
    ) -> Result<NaiveDateTime> {
        let (row, col) = a1_to_pos(addr)?;
        parse_datetime_cell(range.get_value((row, col)), self.schema.trade_date_format)
            .with_context(|| format!("Cannot convert {} in header cell {}", what, addr))
    }

    fn header_value_date(&self, range: &Range<Data>, addr: &str, what: &str) -> Result<NaiveDate> {
        let (row, col) = a1_to_pos(addr)?;
        parse_date_cell(range.get_value((row, col)), self.schema.value_date_format)
            .with_context(|| format!("Cannot convert {} in header cell {}", what, addr))
    }
}

fn cell_str(cell: Option<&Data>) -> Option<String> {
    let c = cell?;
    match c {
        Data::String(s) => Some(s.clone()),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::Empty => None,
        _ => Some(c.to_string()),
    }
}

/// Parses an A1-style address into a zero-based (row, column) pair.
fn a1_to_pos(addr: &str) -> Result<(u32, u32)> {
    let mut col = 0u32;
    let mut row = 0u32;
    let mut saw_col = false;
    let mut saw_row = false;

    for ch in addr.chars() {
        if ch.is_ascii_alphabetic() {
            if saw_row {
                bail!("Invalid cell address: {}", addr);
            }
            col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
            saw_col = true;
        } else if let Some(digit) = ch.to_digit(10) {
            row = row * 10 + digit;
            saw_row = true;
        } else {
            bail!("Invalid cell address: {}", addr);
        }
    }

    if !saw_col || !saw_row || row == 0 {
        bail!("Invalid cell address: {}", addr);
    }
    Ok((row - 1, col - 1))
}

/// Rebuilds the A1-style address of a zero-based (row, column) position,
/// for error messages pointing back at the source sheet.
fn pos_to_a1(row: usize, col: usize) -> String {
    let mut n = col as u32 + 1;
    let mut letters = String::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    format!("{}{}", letters, row + 1)
}

/// Integer cell that may carry thousands separators ("1,234").
fn parse_i64(raw: &str) -> Result<i64> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        bail!("empty numeric cell");
    }
    Ok(cleaned.parse::<i64>()?)
}

/// Decimal cell that may carry thousands separators ("1,500.5").
fn parse_f64(raw: &str) -> Result<f64> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        bail!("empty numeric cell");
    }
    Ok(cleaned.parse::<f64>()?)
}

/// Handles date cells that arrive either as Excel serial values or as text
/// in the schema's date grammar. Date-only text gets midnight.
fn parse_datetime_cell(cell: Option<&Data>, format: &str) -> Result<NaiveDateTime> {
    let Some(c) = cell else {
        bail!("empty date cell");
    };
    match c {
        Data::Float(f) => excel_serial_to_datetime(*f),
        Data::Int(i) => excel_serial_to_datetime(*i as f64),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()),
        Data::String(s) => parse_datetime_str(s, format),
        Data::Empty => bail!("empty date cell"),
        _ => parse_datetime_str(&c.to_string(), format),
    }
}

fn parse_date_cell(cell: Option<&Data>, format: &str) -> Result<NaiveDate> {
    parse_datetime_cell(cell, format).map(|dt| dt.date())
}

fn parse_datetime_str(s: &str, format: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty date cell");
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
        return Ok(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, format) {
        return Ok(d.and_time(NaiveTime::MIN));
    }
    bail!("unsupported date value: {}", s)
}

/// Excel serial date conversion using the 1899-12-30 base (common convention).
fn excel_serial_to_datetime(v: f64) -> Result<NaiveDateTime> {
    if !v.is_finite() {
        bail!("non-finite excel date value");
    }
    let days = v.floor() as i64;
    let secs = ((v - v.floor()) * 86_400.0).round() as i64;
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)
        .ok_or_else(|| anyhow!("bad serial base date"))?;
    Ok(base.and_time(NaiveTime::MIN) + Duration::days(days) + Duration::seconds(secs))
}
