//! Tagged logging front-end.

pub mod logger;

pub use logger::{log_critical, log_debug, log_info, log_warn};
