use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Output partition an allocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationCategory {
	Primary,
	Rull,
	Temp,
}

impl AllocationCategory {
	pub fn label(&self) -> &'static str {
		match self {
			AllocationCategory::Primary => "primary",
			AllocationCategory::Rull => "rull",
			AllocationCategory::Temp => "temp",
		}
	}
}

/// The security terms one category trades under: ISIN, settlement id,
/// percent-of-par price and settlement currency. Sourced once per run from
/// the header block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTerms {
	pub isin: String,
	pub smid: i64,
	pub price: f64,
	pub currency: String,
}

/// Header-derived constants shared by every allocation in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
	pub book: i64,
	pub trade_date: NaiveDateTime,
	pub value_date: NaiveDate,
	pub primary: CategoryTerms,
	pub rull: CategoryTerms,
	pub temp: CategoryTerms,
}

impl RunContext {
	pub fn terms(&self, category: AllocationCategory) -> &CategoryTerms {
		match category {
			AllocationCategory::Primary => &self.primary,
			AllocationCategory::Rull => &self.rull,
			AllocationCategory::Temp => &self.temp,
		}
	}
}

/// Scalars read once from the header block and passed through to the
/// finance report unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
	pub preparer: String,
	pub deal: String,
	pub project_id: String,
}

/// One investor's share of a trade in one category. Immutable after
/// creation; category fan-out goes through [`Allocation::for_category`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
	pub category: AllocationCategory,
	pub isin: String,
	pub currency: String,
	pub client_name: String,
	pub broker_id: String,
	pub account_type: String,
	pub back_office_comments: String,
	/// Shares allocated. Sign conventions are applied at projection time.
	pub quantity: i64,
	/// Quantity reported to finance; may differ from `quantity`.
	pub finance_quantity: i64,
	pub inferno_nr: i64,
	pub smid: i64,
	pub book: i64,
	pub trade_date: NaiveDateTime,
	pub value_date: NaiveDate,
	/// Unit price, percent-of-par convention.
	pub price: f64,
	/// `None` means no fee was specified. A fee of exactly zero is treated
	/// as absent, never as "zero fee".
	pub commitment_fee: Option<f64>,
	pub fee_currency: String,
}

impl Allocation {
	/// Derives the rull/temp variant of a base allocation: same row-level
	/// fields, but the quantity and security terms of the given category.
	///
	/// The fee currency is not part of the terms; it stays bound to the
	/// primary settlement currency across all categories.
	pub fn for_category(
		&self,
		category: AllocationCategory,
		quantity: i64,
		terms: &CategoryTerms,
	) -> Allocation {
		Allocation {
			category,
			quantity,
			isin: terms.isin.clone(),
			smid: terms.smid,
			price: terms.price,
			currency: terms.currency.clone(),
			..self.clone()
		}
	}

	/// Pot accounts are kept out of the trade upload but still reported
	/// to finance.
	pub fn is_pot_account(&self) -> bool {
		self.account_type.trim().eq_ignore_ascii_case("pot")
	}
}

/// Everything one parser run produces: the three category partitions plus
/// the run-level constants and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRun {
	pub context: RunContext,
	pub metadata: RunMetadata,
	pub primary: Vec<Allocation>,
	pub rull: Vec<Allocation>,
	pub temp: Vec<Allocation>,
}
