//! XINS RPC-over-HTTP framework.
//!
//! Re-exports the engine, client and result grammar from `xins-core`,
//! configuration from `xins-config` and the server entry point from
//! `xins-bin`.

pub use xins_core::*;

pub use xins_bin::run;
pub use xins_config as config;
