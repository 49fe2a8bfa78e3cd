//! # Monitoring Engine
//!
//! The long-running core: the connection supervisor that owns the upstream
//! stream lifecycle, the classifier/processor that turns qualifying
//! transfers into ledger grants, the periodic expiration sweeper, the
//! startup backfill scan and the shared health state the status endpoint
//! reads.

pub mod backfill;
pub mod classifier;
pub mod health;
pub mod supervisor;
pub mod sweeper;
