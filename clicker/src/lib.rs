// Library side of the `clicker` binary. Each module is usable on
// its own so the startup sequence can be exercised without a terminal.

pub mod activity;
pub mod compat;
pub mod config;
pub mod consts;
pub mod dialogs;
pub mod engine;
pub mod hotkey;
pub mod launcher;
pub mod paths;
pub mod shell;
pub mod singleton;
pub mod store;
pub mod update;
pub mod version;

#[cfg(test)]
mod test_support;
