//! ASI-specific status codes and their host texts.

use mmdev_core::device::ErrorCatalog;

/// Reply did not parse.
pub const ERR_UNRECOGNIZED_ANSWER: i32 = 10009;
/// Filter wheel not connected.
pub const ERR_FILTER_WHEEL_NOT_READY: i32 = 10010;
/// Filter wheel still spinning.
pub const ERR_FILTER_WHEEL_SPINNING: i32 = 10011;
/// Controller has too few axes.
pub const ERR_NOT_ENOUGH_AXES: i32 = 10012;
/// Card address out of range.
pub const ERR_TOO_LARGE_ADDRESSES: i32 = 10013;
/// CRISP needs calibration.
pub const ERR_CRISP_NOT_CALIBRATED: i32 = 10014;
/// CRISP is not locked.
pub const ERR_CRISP_NOT_LOCKED: i32 = 10015;

/// Texts registered by every ASI device.
pub const ASI_ERROR_TEXTS: [(i32, &str); 7] = [
    (ERR_UNRECOGNIZED_ANSWER, "Unrecognized serial answer from ASI device"),
    (ERR_FILTER_WHEEL_NOT_READY, "Filter wheel doesn't appear to be connected"),
    (ERR_FILTER_WHEEL_SPINNING, "Filter wheel is spinning, try again later"),
    (ERR_NOT_ENOUGH_AXES, "Controller reports fewer axes than the device needs"),
    (ERR_TOO_LARGE_ADDRESSES, "Card address out of range for this controller"),
    (
        ERR_CRISP_NOT_CALIBRATED,
        "CRISP is not calibrated; focus near the coverslip and run calibration",
    ),
    (ERR_CRISP_NOT_LOCKED, "CRISP is not locked"),
];

/// Add the ASI table to `catalog`, leaving other entries in place.
pub fn register_asi_errors(catalog: &mut ErrorCatalog) {
    for (code, text) in ASI_ERROR_TEXTS {
        catalog.set(code, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmdev_core::codes;

    #[test]
    fn test_registration_keeps_defaults() {
        let mut catalog = ErrorCatalog::with_defaults();
        let before = catalog.len();
        register_asi_errors(&mut catalog);

        assert_eq!(catalog.len(), before + ASI_ERROR_TEXTS.len());
        assert!(catalog.contains(codes::DEVICE_INVALID_PROPERTY));
        assert_eq!(catalog.text(ERR_CRISP_NOT_LOCKED), Some("CRISP is not locked"));
    }

    #[test]
    fn test_codes_are_distinct_from_host_codes() {
        let defaults = ErrorCatalog::with_defaults();
        for (code, _) in ASI_ERROR_TEXTS {
            assert!(!defaults.contains(code), "code {} collides", code);
        }
    }
}
