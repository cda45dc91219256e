//! Cycle engine: the phase state machine and the components it drives.
//! - `pool` — worker pool registry
//! - `treasury` — reserve floor and disbursement sizing
//! - `executor` — acquire / liquidate through the swap service
//! - `lease` — keeps the step's lease alive and gates submissions on it
//! - `settlement` — sweep residual balances back to the treasury
//! - `scheduler` — one transition per step, under the lease

pub mod executor;
pub mod lease;
pub mod pool;
pub mod scheduler;
pub mod settlement;
pub mod treasury;

pub use executor::{ExecutorConfig, TradeExecutor};
pub use lease::{StepLease, SubmitGuard};
pub use pool::WorkerPool;
pub use scheduler::{CycleScheduler, SchedulerConfig};
pub use settlement::SettlementAgent;
pub use treasury::{TreasuryGuard, TreasuryPolicy};
