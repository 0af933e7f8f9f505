//! Host-visible device properties.
//!
//! The host treats every property as a string with some metadata: a declared
//! type, an optional set of allowed values, an optional numeric range, and
//! two flags. `read_only` properties are changed only by the device itself
//! (through [`PropertyMap::update`]); `pre_init` properties are settable by the
//! host until [`PropertyMap::lock_pre_init`] is called, which devices do on
//! initialize.
//!
//! Devices keep the authoritative state in typed fields and mirror it here;
//! `set` validates a host write before the device applies it.

use crate::error::{DeviceError, DeviceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    /// Free text.
    String,
    /// Signed integer.
    Integer,
    /// Floating point.
    Float,
}

/// Everything about a property except its value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyMetadata {
    /// Unique within a device.
    pub name: String,
    /// How values are validated.
    pub property_type: PropertyType,
    /// Host writes are rejected.
    pub read_only: bool,
    /// Writable only before initialize.
    pub pre_init: bool,
    /// Empty means unrestricted.
    #[serde(default)]
    pub allowed_values: Vec<String>,
    /// Inclusive lower bound for numeric properties.
    #[serde(default)]
    pub min_value: Option<f64>,
    /// Inclusive upper bound for numeric properties.
    #[serde(default)]
    pub max_value: Option<f64>,
}

/// A named value with its metadata.
#[derive(Debug, Clone)]
pub struct Property {
    metadata: PropertyMetadata,
    value: String,
}

impl Property {
    /// Writable property with no restrictions.
    pub fn new(name: impl Into<String>, property_type: PropertyType, value: impl Into<String>) -> Self {
        Self {
            metadata: PropertyMetadata {
                name: name.into(),
                property_type,
                read_only: false,
                pre_init: false,
                allowed_values: Vec::new(),
                min_value: None,
                max_value: None,
            },
            value: value.into(),
        }
    }

    /// String property.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, PropertyType::String, value)
    }

    /// Integer property.
    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, PropertyType::Integer, value.to_string())
    }

    /// Float property; the value is formatted with [`format_float`].
    pub fn float(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, PropertyType::Float, format_float(value))
    }

    /// Reject host writes.
    pub fn read_only(mut self) -> Self {
        self.metadata.read_only = true;
        self
    }

    /// Allow writes only before initialize.
    pub fn pre_init(mut self) -> Self {
        self.metadata.pre_init = true;
        self
    }

    /// Restrict host writes to `values`.
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Numeric range, both ends inclusive.
    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.metadata.min_value = Some(min);
        self.metadata.max_value = Some(max);
        self
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Value as text.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Type, flags and restrictions.
    pub fn metadata(&self) -> &PropertyMetadata {
        &self.metadata
    }

    /// Check a candidate value against type, allowed set and limits.
    pub fn validate(&self, value: &str) -> DeviceResult<()> {
        let invalid = || DeviceError::InvalidPropertyValue {
            name: self.metadata.name.clone(),
            value: value.to_string(),
        };

        if !self.metadata.allowed_values.is_empty()
            && !self.metadata.allowed_values.iter().any(|v| v == value)
        {
            return Err(invalid());
        }

        let numeric = match self.metadata.property_type {
            PropertyType::String => None,
            PropertyType::Integer => Some(value.trim().parse::<i64>().map_err(|_| invalid())? as f64),
            PropertyType::Float => {
                let v = value.trim().parse::<f64>().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                Some(v)
            }
        };

        if let Some(v) = numeric {
            if self.metadata.min_value.is_some_and(|min| v < min)
                || self.metadata.max_value.is_some_and(|max| v > max)
            {
                return Err(invalid());
            }
        }

        Ok(())
    }
}

/// Render a float the way the host displays property values.
pub fn format_float(value: f64) -> String {
    format!("{:.4}", value)
}

/// Named property collection for one device.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    properties: BTreeMap<String, Property>,
    pre_init_locked: bool,
}

impl PropertyMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new property; fails if the name is taken.
    pub fn create(&mut self, property: Property) -> DeviceResult<()> {
        if self.properties.contains_key(property.name()) {
            return Err(DeviceError::DuplicateProperty(property.name().to_string()));
        }
        self.properties.insert(property.name().to_string(), property);
        Ok(())
    }

    /// Whether `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Value of `name`, or `InvalidProperty`.
    pub fn get(&self, name: &str) -> DeviceResult<&str> {
        self.properties
            .get(name)
            .map(Property::value)
            .ok_or_else(|| DeviceError::InvalidProperty(name.to_string()))
    }

    /// Property record for `name`.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Would a host write of `value` be accepted? Nothing is stored.
    pub fn check(&self, name: &str, value: &str) -> DeviceResult<()> {
        let property = self
            .properties
            .get(name)
            .ok_or_else(|| DeviceError::InvalidProperty(name.to_string()))?;

        if property.metadata.read_only || (self.pre_init_locked && property.metadata.pre_init) {
            return Err(DeviceError::PropertyReadOnly(name.to_string()));
        }
        property.validate(value)
    }

    /// Host write: validated and subject to the read-only and pre-init rules.
    pub fn set(&mut self, name: &str, value: &str) -> DeviceResult<()> {
        self.check(name, value)?;
        if let Some(property) = self.properties.get_mut(name) {
            property.value = value.to_string();
        }
        Ok(())
    }

    /// Create the property, or refresh its value when it already exists.
    pub fn ensure(&mut self, property: Property) -> DeviceResult<()> {
        match self.properties.get_mut(property.name()) {
            Some(existing) => {
                existing.value = property.value;
                Ok(())
            }
            None => self.create(property),
        }
    }

    /// Device-side write; bypasses the read-only flag but still validates.
    pub fn update(&mut self, name: &str, value: impl Into<String>) -> DeviceResult<()> {
        let value = value.into();
        let property = self
            .properties
            .get_mut(name)
            .ok_or_else(|| DeviceError::InvalidProperty(name.to_string()))?;
        property.validate(&value)?;
        property.value = value;
        Ok(())
    }

    /// Freeze pre-init properties.
    pub fn lock_pre_init(&mut self) {
        self.pre_init_locked = true;
    }

    /// Make pre-init properties writable again.
    pub fn unlock_pre_init(&mut self) {
        self.pre_init_locked = false;
    }

    /// Property names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Snapshot of all values, keyed by name.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.properties
                .iter()
                .map(|(k, p)| (k.clone(), serde_json::Value::String(p.value.clone())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PropertyMap {
        let mut props = PropertyMap::new();
        props
            .create(Property::string("Name", "Cam").read_only())
            .unwrap();
        props
            .create(Property::string("Mode", "Multi").with_allowed_values(["Multi", "Single"]))
            .unwrap();
        props.create(Property::integer("Demo", 1).pre_init()).unwrap();
        props
            .create(Property::float("Exposure", 10.0).with_limits(0.0, 10_000.0))
            .unwrap();
        props
    }

    #[test]
    fn test_allowed_values_enforced() {
        let mut props = sample();
        props.set("Mode", "Single").unwrap();
        assert_eq!(props.get("Mode").unwrap(), "Single");

        let err = props.set("Mode", "Triple").unwrap_err();
        assert!(matches!(err, DeviceError::InvalidPropertyValue { .. }));
        assert_eq!(props.get("Mode").unwrap(), "Single");
    }

    #[test]
    fn test_read_only_rejects_host_write_but_not_device_update() {
        let mut props = sample();
        assert!(matches!(
            props.set("Name", "Other"),
            Err(DeviceError::PropertyReadOnly(_))
        ));
        props.update("Name", "Other").unwrap();
        assert_eq!(props.get("Name").unwrap(), "Other");
    }

    #[test]
    fn test_pre_init_locks_after_initialize() {
        let mut props = sample();
        props.set("Demo", "0").unwrap();
        props.lock_pre_init();
        assert!(props.set("Demo", "1").is_err());
        assert_eq!(props.get("Demo").unwrap(), "0");
    }

    #[test]
    fn test_numeric_validation() {
        let mut props = sample();
        assert!(props.set("Demo", "yes").is_err());
        assert!(props.set("Exposure", "-1").is_err());
        assert!(props.set("Exposure", "NaN").is_err());
        props.set("Exposure", "5.5").unwrap();
    }

    #[test]
    fn test_unknown_and_duplicate() {
        let mut props = sample();
        assert!(matches!(
            props.get("Gain"),
            Err(DeviceError::InvalidProperty(_))
        ));
        assert!(matches!(
            props.create(Property::string("Mode", "Multi")),
            Err(DeviceError::DuplicateProperty(_))
        ));
        assert_eq!(props.len(), 4);
    }
}
