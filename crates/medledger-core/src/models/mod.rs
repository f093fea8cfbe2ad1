//! Domain models for medledger.

pub mod administration;
pub mod drug;
pub mod order;
pub mod transfer;

pub use administration::*;
pub use drug::*;
pub use order::*;
pub use transfer::*;

/// Current UTC time as a fixed-width RFC 3339 string.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
