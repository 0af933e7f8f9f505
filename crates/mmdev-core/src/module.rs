//! Device module registry.
//!
//! A device library exposes a list of device names and a create-by-name entry
//! point. Here each device kind is a [`DeviceFactory`] and the library is a
//! [`ModuleRegistry`] filled explicitly at startup:
//!
//! ```rust,ignore
//! let mut registry = ModuleRegistry::new();
//! registry.register(AcquireCameraFactory)?;
//!
//! for info in registry.list() {
//!     println!("{} - {}", info.name, info.description);
//! }
//! let camera = registry.create("AcquireCamera", toml::Value::Table(Default::default())).await?;
//! ```

use crate::capabilities::{Camera, Device, DeviceType};
use crate::config::DeviceDefinition;
use crate::error::DeviceResult;
use crate::property::PropertyMap;
use anyhow::{anyhow, bail, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A constructed device, typed by the surface it implements.
pub enum DeviceInstance {
    /// Implements [`Camera`].
    Camera(Box<dyn Camera>),
    /// Implements only [`Device`].
    Generic(Box<dyn Device>),
}

macro_rules! forward {
    ($self:ident, $d:ident => $body:expr) => {
        match $self {
            DeviceInstance::Camera($d) => $body,
            DeviceInstance::Generic($d) => $body,
        }
    };
}

impl DeviceInstance {
    /// Device name.
    pub fn name(&self) -> &str {
        forward!(self, d => d.name())
    }

    /// Device category.
    pub fn device_type(&self) -> DeviceType {
        forward!(self, d => d.device_type())
    }

    /// Device properties.
    pub fn properties(&self) -> &PropertyMap {
        forward!(self, d => d.properties())
    }

    /// Forward a host property write.
    pub fn set_property(&mut self, name: &str, value: &str) -> DeviceResult<()> {
        forward!(self, d => d.set_property(name, value))
    }

    /// Initialize the device.
    pub fn initialize(&mut self) -> DeviceResult<()> {
        forward!(self, d => d.initialize())
    }

    /// Shut the device down.
    pub fn shutdown(&mut self) -> DeviceResult<()> {
        forward!(self, d => d.shutdown())
    }

    /// Whether the device is initialized.
    pub fn is_initialized(&self) -> bool {
        forward!(self, d => d.is_initialized())
    }

    /// The camera, if this instance is one.
    pub fn into_camera(self) -> Option<Box<dyn Camera>> {
        match self {
            DeviceInstance::Camera(c) => Some(c),
            DeviceInstance::Generic(_) => None,
        }
    }
}

impl std::fmt::Debug for DeviceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            DeviceInstance::Camera(_) => "Camera",
            DeviceInstance::Generic(_) => "Generic",
        };
        f.debug_struct("DeviceInstance")
            .field("kind", &kind)
            .field("name", &self.name())
            .finish()
    }
}

/// Builds one device type from its TOML settings.
pub trait DeviceFactory: Send + Sync {
    /// Name the host uses in create-by-name (e.g. "AcquireCamera").
    fn name(&self) -> &'static str;

    /// One-line summary for listings.
    fn description(&self) -> &'static str;

    /// Category of the devices it builds.
    fn device_type(&self) -> DeviceType;

    /// Reject a configuration table before anything is constructed.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Construct the device. `config` has already passed `validate`.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceInstance>>;
}

/// Listing entry for a registered factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Registry name.
    pub name: &'static str,
    /// One-line summary.
    pub description: &'static str,
    /// Category of the device.
    pub device_type: DeviceType,
}

/// Device factories keyed by name.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<&'static str, Box<dyn DeviceFactory>>,
}

impl ModuleRegistry {
    /// Registry without factories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory; names must be unique.
    pub fn register<F>(&mut self, factory: F) -> Result<()>
    where
        F: DeviceFactory + 'static,
    {
        let name = factory.name();
        if self.factories.contains_key(name) {
            bail!("Device '{}' is already registered", name);
        }
        debug!(device = name, "Registered device factory");
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Available devices, sorted by name.
    pub fn list(&self) -> Vec<DeviceInfo> {
        self.factories
            .values()
            .map(|f| DeviceInfo {
                name: f.name(),
                description: f.description(),
                device_type: f.device_type(),
            })
            .collect()
    }

    /// Whether a factory named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Validate `config` and build the named device.
    pub async fn create(&self, name: &str, config: toml::Value) -> Result<DeviceInstance> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("Unknown device '{}'", name))?;
        factory.validate(&config)?;
        let device = factory.build(config).await?;
        info!(device = name, "Created device");
        Ok(device)
    }

    /// Build a device from a configuration entry, naming its label on failure.
    pub async fn create_from_definition(&self, definition: &DeviceDefinition) -> Result<DeviceInstance> {
        self.create(&definition.driver, definition.config.clone())
            .await
            .map_err(|e| e.context(format!("Failed to create device '{}'", definition.label)))
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceBase;

    struct Stub {
        base: DeviceBase,
    }

    impl Device for Stub {
        fn name(&self) -> &str {
            self.base.name.get().unwrap_or("Stub")
        }
        fn device_type(&self) -> DeviceType {
            DeviceType::Generic
        }
        fn busy(&self) -> bool {
            false
        }
        fn error_text(&self, code: i32) -> Option<String> {
            self.base.error_text(code)
        }
        fn properties(&self) -> &PropertyMap {
            &self.base.properties
        }
        fn set_property(&mut self, name: &str, value: &str) -> DeviceResult<()> {
            self.base.properties.set(name, value)
        }
        fn initialize(&mut self) -> DeviceResult<()> {
            self.base.mark_initialized();
            Ok(())
        }
        fn shutdown(&mut self) -> DeviceResult<()> {
            self.base.mark_shutdown();
            Ok(())
        }
        fn is_initialized(&self) -> bool {
            self.base.lifecycle.is_initialized()
        }
    }

    struct StubFactory;

    impl DeviceFactory for StubFactory {
        fn name(&self) -> &'static str {
            "Stub"
        }
        fn description(&self) -> &'static str {
            "Test stub"
        }
        fn device_type(&self) -> DeviceType {
            DeviceType::Generic
        }
        fn validate(&self, config: &toml::Value) -> Result<()> {
            if config.get("fail").is_some() {
                bail!("fail requested");
            }
            Ok(())
        }
        fn build(&self, _config: toml::Value) -> BoxFuture<'static, Result<DeviceInstance>> {
            Box::pin(async move {
                let base = DeviceBase::new("Stub")?;
                Ok(DeviceInstance::Generic(Box::new(Stub { base })))
            })
        }
    }

    fn empty() -> toml::Value {
        toml::Value::Table(toml::map::Map::new())
    }

    #[tokio::test]
    async fn test_register_list_create() {
        let mut registry = ModuleRegistry::new();
        registry.register(StubFactory).unwrap();
        assert!(registry.register(StubFactory).is_err());

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Stub");

        let mut device = registry.create("Stub", empty()).await.unwrap();
        assert_eq!(device.name(), "Stub");
        device.initialize().unwrap();
        assert!(device.is_initialized());
        assert!(device.into_camera().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_and_invalid() {
        let mut registry = ModuleRegistry::new();
        registry.register(StubFactory).unwrap();

        assert!(registry.create("Nope", empty()).await.is_err());

        let mut table = toml::map::Map::new();
        table.insert("fail".to_string(), toml::Value::Boolean(true));
        let err = registry
            .create("Stub", toml::Value::Table(table))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fail requested"));
    }
}
