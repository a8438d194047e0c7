//! Background sweeper tasks: run expiry, run timeouts, and count
//! reconciliation.

mod expiry;
mod reconciler;
mod timeout;

pub use expiry::{spawn_expiry_sweeper, ExpirySweeper, ExpirySweeperConfig};
pub use reconciler::{spawn_reconciler, ReconcilerConfig, ReconcilerTask};
pub use timeout::{spawn_timeout_sweeper, TimeoutSweeper, TimeoutSweeperConfig};
