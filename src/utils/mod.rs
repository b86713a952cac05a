//! The `utils` module collects the pieces shared by every other module:
//! error types, logging setup and process signal handling.

pub mod error;
pub mod logging;
pub mod signals;
