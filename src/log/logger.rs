//! Tagged log helpers over the `log` facade.
//!
//! The tag becomes the record target, so a firmware console logger (installed by
//! `uefi-services` in the application) prints `[tag] message`. With the `logging` feature
//! disabled every helper compiles to nothing.

#[cfg(feature = "logging")]
#[inline]
pub fn log_info(tag: &str, msg: &str) {
    ::log::info!(target: tag, "{}", msg);
}

#[cfg(feature = "logging")]
#[inline]
pub fn log_warn(tag: &str, msg: &str) {
    ::log::warn!(target: tag, "{}", msg);
}

#[cfg(feature = "logging")]
#[inline]
pub fn log_debug(tag: &str, msg: &str) {
    ::log::debug!(target: tag, "{}", msg);
}

/// Fatal conditions. Always emitted at error level.
#[cfg(feature = "logging")]
#[inline]
pub fn log_critical(tag: &str, msg: &str) {
    ::log::error!(target: tag, "{}", msg);
}

#[cfg(not(feature = "logging"))]
#[inline]
pub fn log_info(_tag: &str, _msg: &str) {}

#[cfg(not(feature = "logging"))]
#[inline]
pub fn log_warn(_tag: &str, _msg: &str) {}

#[cfg(not(feature = "logging"))]
#[inline]
pub fn log_debug(_tag: &str, _msg: &str) {}

#[cfg(not(feature = "logging"))]
#[inline]
pub fn log_critical(_tag: &str, _msg: &str) {}
