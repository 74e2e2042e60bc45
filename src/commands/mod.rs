//! CLI command implementations
//!
//! Every command takes an already-opened transport and the options parsed
//! from the programmer string, builds the engine or bus it needs and runs
//! to completion. Dropping the engine at the end resets the adapter.

pub mod gpio;
pub mod i2c;
mod list;
mod probe;
pub mod spi;

pub use list::run_list;
pub use probe::run_probe;
