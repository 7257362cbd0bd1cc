pub mod compactor;
pub mod registry;
pub mod session_store;

pub use compactor::{
    CompactionConfig, CompactionReport, CompactionStage, ContextCompactor, Summarizer,
    SummaryError, SUMMARY_INSTRUCTION,
};
pub use registry::{SessionEntry, SessionRegistry, TurnAccess};
pub use session_store::{JsonlSessionStore, SessionStore, StoreError};
