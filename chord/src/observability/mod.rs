//! Observability utilities.
//!
//! The runtime logs through `tracing`; this module only installs a
//! subscriber for binaries that don't bring their own.

mod subscriber;

pub use subscriber::{init_tracing, LogFormat};
