//! State shared by every ASI device.

use mmdev_core::device::DeviceBase;
use mmdev_core::property::{format_float, Property, PropertyMap};
use mmdev_core::DeviceResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::register_asi_errors;

/// Reported by `name()` until a name has been set.
pub const UNDEFINED_NAME: &str = "Undefined";

/// Read-only firmware version property.
pub const PROP_FIRMWARE_VERSION: &str = "FirmwareVersion";
/// Read-only firmware date property.
pub const PROP_FIRMWARE_DATE: &str = "FirmwareDate";
/// Read-only firmware build property.
pub const PROP_FIRMWARE_BUILD: &str = "FirmwareBuild";

/// Where a device sits in the controller topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsiRole {
    /// Owns the serial link and enumerates cards.
    Hub,
    /// Card addressed through a hub.
    #[default]
    Peripheral,
}

/// Controller firmware as reported at initialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    /// Version number, e.g. 3.3.
    pub version: f64,
    /// Build date as reported, e.g. "Jun 12 2023".
    pub date: String,
    /// Build name, e.g. "TIGER_COMM".
    pub build: String,
}

/// Name, role, error texts and firmware shared by every ASI device.
#[derive(Debug, Clone)]
pub struct AsiBase {
    base: DeviceBase,
    role: AsiRole,
    firmware: FirmwareInfo,
    refresh_props: bool,
}

impl AsiBase {
    /// An empty `name` skips the `Name` property; hubs use this to name
    /// themselves once their cards are known.
    pub fn new(name: &str) -> DeviceResult<Self> {
        let mut base = DeviceBase::new(name)?;
        register_asi_errors(&mut base.errors);
        Ok(Self {
            base,
            role: AsiRole::default(),
            firmware: FirmwareInfo::default(),
            refresh_props: false,
        })
    }

    /// Set the topology role.
    pub fn with_role(mut self, role: AsiRole) -> Self {
        self.role = role;
        self
    }

    /// Device name, or [`UNDEFINED_NAME`] before one is set.
    pub fn name(&self) -> &str {
        self.base.name.get().unwrap_or(UNDEFINED_NAME)
    }

    /// Set the name and create or refresh the read-only `Name` property.
    pub fn set_name(&mut self, name: &str) -> DeviceResult<()> {
        self.base.name.set(name, &mut self.base.properties)
    }

    /// Hub or peripheral.
    pub fn role(&self) -> AsiRole {
        self.role
    }

    /// ASI devices report idle unless the concrete device overrides it.
    pub fn busy(&self) -> bool {
        false
    }

    /// Text for `code` from the host or ASI tables.
    pub fn error_text(&self, code: i32) -> Option<String> {
        self.base.error_text(code)
    }

    /// Device properties.
    pub fn properties(&self) -> &PropertyMap {
        &self.base.properties
    }

    /// Mutable access for the concrete device.
    pub fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.base.properties
    }

    /// Whether the device is initialized.
    pub fn is_initialized(&self) -> bool {
        self.base.lifecycle.is_initialized()
    }

    /// Called by the concrete device once its properties are read from the
    /// controller.
    pub fn mark_initialized(&mut self) {
        self.base.mark_initialized();
    }

    /// Mark the device shut down. Never fails.
    pub fn shutdown(&mut self) -> DeviceResult<()> {
        if self.is_initialized() {
            debug!(device = self.name(), "ASI device shut down");
        }
        self.base.mark_shutdown();
        Ok(())
    }

    /// Firmware recorded at initialize.
    pub fn firmware(&self) -> &FirmwareInfo {
        &self.firmware
    }

    /// Store firmware details and mirror them as read-only properties.
    pub fn set_firmware(&mut self, firmware: FirmwareInfo) -> DeviceResult<()> {
        let props = &mut self.base.properties;
        for property in [
            Property::float(PROP_FIRMWARE_VERSION, firmware.version),
            Property::string(PROP_FIRMWARE_DATE, firmware.date.clone()),
            Property::string(PROP_FIRMWARE_BUILD, firmware.build.clone()),
        ] {
            props.ensure(property.read_only())?;
        }
        debug!(
            device = self.name(),
            version = %format_float(firmware.version),
            build = %firmware.build,
            "Firmware recorded"
        );
        self.firmware = firmware;
        Ok(())
    }

    /// Whether property reads should go back to the controller each time.
    pub fn refresh_props(&self) -> bool {
        self.refresh_props
    }

    /// Toggle controller round trips on property reads.
    pub fn set_refresh_props(&mut self, refresh: bool) {
        self.refresh_props = refresh;
    }
}
