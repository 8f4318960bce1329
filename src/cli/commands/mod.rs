//! CLI command implementations

pub mod config;
pub mod hash;
pub mod sync;

pub use config::execute as config;
pub use hash::execute as hash;
pub use sync::execute as sync;
