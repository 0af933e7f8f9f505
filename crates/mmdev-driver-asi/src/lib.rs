//! ASI stage-controller family.
//!
//! Concrete controllers (stages, filter wheels, CRISP autofocus) compose
//! [`AsiBase`] for the pieces every ASI device shares: the ASI error table,
//! the optional `Name` property, the initialized flag and firmware info.
//! Motion protocols live in the concrete devices.

pub mod base;
pub mod errors;

pub use base::{AsiBase, AsiRole, FirmwareInfo, UNDEFINED_NAME};
