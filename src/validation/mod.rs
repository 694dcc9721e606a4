//! Cross-source price validation
//!
//! Stream and REST quotes for the same market should agree. Divergence beyond a
//! threshold is flagged as significant, and beyond a second threshold as potential
//! arbitrage.

mod types;
mod validator;

pub use types::{diff_pct, DiscrepancyStats, ValidationResult, ValidatorConfig};
pub use validator::PriceValidator;
