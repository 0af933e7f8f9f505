//! Registry entry for `AcquireCamera`.

use anyhow::Result;
use futures::future::BoxFuture;
use mmdev_core::capabilities::DeviceType;
use mmdev_core::module::{DeviceFactory, DeviceInstance};

use crate::camera::{AcquireCamera, DEVICE_DESCRIPTION, DEVICE_NAME};
use crate::config::AcquireCameraConfig;

/// Registry entry that builds [`AcquireCamera`](crate::AcquireCamera) devices.
pub struct AcquireCameraFactory;

impl DeviceFactory for AcquireCameraFactory {
    fn name(&self) -> &'static str {
        DEVICE_NAME
    }

    fn description(&self) -> &'static str {
        DEVICE_DESCRIPTION
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Camera
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        AcquireCameraConfig::from_toml(config.clone())?.validate()
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceInstance>> {
        Box::pin(async move {
            let cfg = AcquireCameraConfig::from_toml(config)?;
            let camera = AcquireCamera::with_config(cfg)?;
            Ok(DeviceInstance::Camera(Box::new(camera)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmdev_core::module::ModuleRegistry;

    #[tokio::test]
    async fn test_registry_creates_camera() {
        let mut registry = ModuleRegistry::new();
        registry.register(AcquireCameraFactory).unwrap();

        let info = &registry.list()[0];
        assert_eq!(info.name, "AcquireCamera");
        assert_eq!(info.device_type, DeviceType::Camera);

        let mut table = toml::map::Map::new();
        table.insert("timeout_ms".to_string(), toml::Value::Integer(250));
        let device = registry
            .create("AcquireCamera", toml::Value::Table(table))
            .await
            .unwrap();
        assert!(device.into_camera().is_some());
    }

    #[test]
    fn test_validate_rejects_bad_depth() {
        let mut table = toml::map::Map::new();
        table.insert("bytes_per_pixel".to_string(), toml::Value::Integer(4));
        assert!(AcquireCameraFactory
            .validate(&toml::Value::Table(table))
            .is_err());
    }
}
