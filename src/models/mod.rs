//! Domain models.

mod position;
mod reconciliation;
mod record;

pub use position::PositionSnapshot;
pub use reconciliation::{assess, tolerance, Discrepancy, ReconciliationResult, Severity};
pub use record::{OrderKind, Side, TradeRecord, TradeState};
