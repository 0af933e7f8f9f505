//! Building blocks shared by concrete devices.
//!
//! Devices compose these instead of inheriting behavior:
//!
//! - [`ErrorCatalog`]: code to text table, pre-filled with the host defaults
//! - [`NameProperty`]: the optional read-only `Name` property
//! - [`LifecycleFlag`]: initialized / shut down
//! - [`DeviceBase`]: all of the above plus the device's [`PropertyMap`]
//!
//! A device holds a `DeviceBase` and forwards the relevant [`Device`] calls
//! to it explicitly.
//!
//! [`Device`]: crate::capabilities::Device

use crate::error::{codes, DeviceError, DeviceResult};
use crate::property::{Property, PropertyMap};
use std::collections::BTreeMap;

/// Read-only property mirroring the device name.
pub const PROP_NAME: &str = "Name";
/// Read-only property carrying the device description.
pub const PROP_DESCRIPTION: &str = "Description";

/// Status code to message table.
#[derive(Debug, Clone)]
pub struct ErrorCatalog {
    texts: BTreeMap<i32, String>,
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ErrorCatalog {
    /// Catalog without any text.
    pub fn empty() -> Self {
        Self {
            texts: BTreeMap::new(),
        }
    }

    /// Catalog holding the host's generic texts.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::empty();
        for (code, text) in [
            (codes::DEVICE_ERR, "Unspecified device error"),
            (codes::DEVICE_INVALID_PROPERTY, "Invalid property name"),
            (codes::DEVICE_INVALID_PROPERTY_VALUE, "Invalid property value"),
            (codes::DEVICE_DUPLICATE_PROPERTY, "Duplicate property name"),
            (codes::DEVICE_INVALID_PROPERTY_TYPE, "Invalid property type"),
            (codes::DEVICE_NATIVE_MODULE_FAILED, "Native module failed to load"),
            (codes::DEVICE_INTERNAL_INCONSISTENCY, "Device adapter internal inconsistency"),
            (codes::DEVICE_NOT_SUPPORTED, "Operation not supported by this device"),
            (codes::DEVICE_NOT_YET_IMPLEMENTED, "Not yet implemented"),
            (codes::DEVICE_NONEXISTENT_CHANNEL, "Requested channel does not exist"),
            (codes::DEVICE_BUFFER_OVERFLOW, "Image buffer overflow"),
            (codes::DEVICE_CAMERA_BUSY_ACQUIRING, "Camera is busy acquiring images"),
            (codes::ERR_NOT_INITIALIZED, "Device is not initialized"),
        ] {
            catalog.set(code, text);
        }
        catalog
    }

    /// Add or replace the text for `code`.
    pub fn set(&mut self, code: i32, text: impl Into<String>) {
        self.texts.insert(code, text.into());
    }

    /// Text for `code`, if registered.
    pub fn text(&self, code: i32) -> Option<&str> {
        self.texts.get(&code).map(String::as_str)
    }

    /// Whether `code` has a text.
    pub fn contains(&self, code: i32) -> bool {
        self.texts.contains_key(&code)
    }

    /// Number of registered codes.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Whether no code has a text.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Device name, mirrored into a read-only `Name` property once non-empty.
#[derive(Debug, Clone, Default)]
pub struct NameProperty {
    name: String,
}

impl NameProperty {
    /// Name without touching any property map.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// `None` until a non-empty name is set.
    pub fn get(&self) -> Option<&str> {
        if self.name.is_empty() {
            None
        } else {
            Some(&self.name)
        }
    }

    /// Store the name and create or refresh the property. Empty names leave
    /// the property map untouched.
    pub fn set(&mut self, name: impl Into<String>, properties: &mut PropertyMap) -> DeviceResult<()> {
        self.name = name.into();
        self.register(properties)
    }

    /// Create or refresh the `Name` property for the current name.
    pub fn register(&self, properties: &mut PropertyMap) -> DeviceResult<()> {
        if self.name.is_empty() {
            return Ok(());
        }
        if properties.contains(PROP_NAME) {
            properties.update(PROP_NAME, self.name.clone())
        } else {
            properties.create(Property::string(PROP_NAME, self.name.clone()).read_only())
        }
    }
}

/// Initialized or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleFlag {
    initialized: bool,
}

impl LifecycleFlag {
    /// Whether initialize has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Record a successful initialize.
    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Back to not initialized.
    pub fn clear(&mut self) {
        self.initialized = false;
    }

    /// `Err(NotInitialized)` unless initialized.
    pub fn ensure_initialized(&self) -> DeviceResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(DeviceError::NotInitialized)
        }
    }
}

/// Composition of the shared device state.
#[derive(Debug, Clone, Default)]
pub struct DeviceBase {
    /// Status code texts.
    pub errors: ErrorCatalog,
    /// Name and its `Name` property.
    pub name: NameProperty,
    /// Initialized flag.
    pub lifecycle: LifecycleFlag,
    /// Host-visible properties.
    pub properties: PropertyMap,
}

impl DeviceBase {
    /// Base with the default error texts and, for a non-empty name, the
    /// `Name` property.
    pub fn new(name: impl Into<String>) -> DeviceResult<Self> {
        let mut base = Self {
            errors: ErrorCatalog::with_defaults(),
            name: NameProperty::new(name),
            lifecycle: LifecycleFlag::default(),
            properties: PropertyMap::new(),
        };
        base.name.register(&mut base.properties)?;
        Ok(base)
    }

    /// Add a read-only `Description` property.
    pub fn with_description(mut self, description: &str) -> DeviceResult<Self> {
        self.properties
            .create(Property::string(PROP_DESCRIPTION, description).read_only())?;
        Ok(self)
    }

    /// Text for `code` from the catalog.
    pub fn error_text(&self, code: i32) -> Option<String> {
        self.errors.text(code).map(str::to_string)
    }

    /// Flip to initialized and freeze pre-init properties.
    pub fn mark_initialized(&mut self) {
        self.lifecycle.mark_initialized();
        self.properties.lock_pre_init();
    }

    /// Back to not initialized; pre-init properties become writable again.
    pub fn mark_shutdown(&mut self) {
        self.lifecycle.clear();
        self.properties.unlock_pre_init();
    }
}
