//! Trading engine: candidate aggregation, execution, accounting and the
//! per-account scheduler that drives them.

pub mod aggregator;
pub mod executor;
pub mod ledger;
pub mod scheduler;
pub mod session;

pub use aggregator::Aggregator;
pub use executor::{ExecutionAdapter, Executors, Fill, LiveExecutor, SimulatedExecutor};
pub use ledger::Ledger;
pub use scheduler::{BotScheduler, StartOutcome, TickOutcome};
pub use session::{BotSession, BotStatusReport};
