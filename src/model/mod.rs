pub mod config;
pub mod entry;
pub mod project;
pub mod undo;

pub use config::*;
pub use entry::*;
pub use project::*;
pub use undo::*;
