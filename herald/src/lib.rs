//! The herald process: configuration, wiring and the control handler
//!
//! [`controller::Herald`] reads `herald.config.ron`, opens the store and runs
//! the dispatcher, recovery scheduler and control socket side by side until
//! shutdown.

pub mod control_handler;
pub mod controller;

pub use control_handler::HeraldControlHandler;
pub use controller::{Herald, find_config_file};
