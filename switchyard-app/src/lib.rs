pub mod cli;
pub mod report;
pub mod repl;

pub use cli::{load_gateway_config, Invocation, Mode, USAGE};
pub use repl::{Repl, ReplCommand};
