use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use allocation_parser::{AllocationSheetParser, SheetSchema};
use trade_upload::{
    project_finance, project_trade_upload, update_finance_workbook, write_trade_upload,
    TradeUploadOptions,
};

#[derive(Parser, Debug)]
#[command(
    name = "upload-allocations",
    about = "Transcribe the newest allocation workbook into a trade-upload file and the finance input table."
)]
struct Args {
    /// Directory scanned for the most recently modified input workbook
    #[arg(long, default_value = "input")]
    input_dir: PathBuf,

    /// Directory the trade-upload workbook is written to
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Pre-existing finance workbook to update in place; defaults to
    /// <output-dir>/finance.xlsx
    #[arg(long)]
    finance_file: Option<PathBuf>,

    /// Worksheet to read from the input workbook; defaults to the first sheet
    #[arg(long)]
    sheet: Option<String>,

    /// Parse both header dates with the unified day-month-year grammar
    #[arg(long, default_value_t = false)]
    unified_dates: bool,

    /// Keep Pot accounts in the trade-upload primary block
    #[arg(long, default_value_t = false)]
    include_pot_accounts: bool,
}

/// Most recently modified .xlsx in the input directory, skipping Excel
/// lock/backup files (names beginning with '~').
fn newest_input_workbook(dir: &Path) -> Result<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    let entries =
        fs::read_dir(dir).with_context(|| format!("Cannot read input directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("xlsx") {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with('~') {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| anyhow!("No .xlsx file found in {}", dir.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let input_path = newest_input_workbook(&args.input_dir)?;
    println!("📖 Reading input workbook: {}", input_path.display());

    let mut parser = AllocationSheetParser::new();
    if args.unified_dates {
        parser = parser.with_schema(SheetSchema::unified_dates());
    }
    if let Some(sheet) = &args.sheet {
        parser = parser.with_sheet_name(sheet);
    }

    let run = parser.parse_file(&input_path)?;
    println!(
        "  ✓ Parsed {} primary, {} rull, {} temp allocations for deal '{}'",
        run.primary.len(),
        run.rull.len(),
        run.temp.len(),
        run.metadata.deal
    );

    // Project both outputs before writing anything, so a malformed input
    // can never leave a partial file pair behind
    let options = TradeUploadOptions {
        exclude_pot_accounts: !args.include_pot_accounts,
    };
    let upload = project_trade_upload(&run, &options);
    let finance = project_finance(&run);

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Cannot create output directory {}", args.output_dir.display()))?;

    let upload_path = args.output_dir.join("tradeUpload.xlsx");
    write_trade_upload(&upload, &upload_path)?;
    println!("  ✓ Trade upload written to {}", upload_path.display());

    let finance_path = args
        .finance_file
        .clone()
        .unwrap_or_else(|| args.output_dir.join("finance.xlsx"));
    update_finance_workbook(&finance, &finance_path)?;
    println!("  ✓ Finance workbook updated at {}", finance_path.display());

    println!("✅ Both output files have been produced.");
    Ok(())
}
