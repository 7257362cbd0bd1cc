pub mod chain;
pub mod checkpoint;
pub mod error;
pub mod ledger;

pub use chain::{entry_hash, ChainVerification, GENESIS_HASH};
pub use checkpoint::{Checkpoint, CheckpointReport};
pub use error::LedgerError;
pub use ledger::{AuditFilter, AuditLedger, LedgerConfig, LedgerRecord, ModelUsage};
