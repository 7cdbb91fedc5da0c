//! The emulated device: identity strings plus the register store,
//! constructed either from a JSON device profile or as a wide-open
//! simulator.

mod registers;

pub use self::registers::{
    BankMode, DataType, RegisterBank, RegisterSpace, TypedRegister, TypedValue, SPACE_SIZE,
};

use crate::error::ProfileError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The device identity strings served by Read Device Identification
/// (FC 0x2B). Absent fields serialize as empty strings, never omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceIdentity {
    pub vendor_name: String,
    pub product_code: String,
    pub major_minor_revision: String,
    pub vendor_url: String,
    pub product_name: String,
    pub model_name: String,
    pub user_application_name: String,
}

impl DeviceIdentity {
    /// Number of identity objects (ids `0..=6`).
    pub const OBJECT_COUNT: u8 = 7;

    /// Look up an identity object by its fixed id.
    #[must_use]
    pub fn object(&self, id: u8) -> Option<&str> {
        let value = match id {
            0x00 => &self.vendor_name,
            0x01 => &self.product_code,
            0x02 => &self.major_minor_revision,
            0x03 => &self.vendor_url,
            0x04 => &self.product_name,
            0x05 => &self.model_name,
            0x06 => &self.user_application_name,
            _ => return None,
        };
        Some(value)
    }
}

/// A register initial value as it appears in the profile document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ProfileValue {
    /// Coerce the document value into the definition's data type.
    ///
    /// Returns `None` if the value cannot represent the type, e.g. an
    /// out-of-range integer or a float for an integer register.
    #[must_use]
    pub fn to_typed(self, data_type: DataType) -> Option<TypedValue> {
        let value = match (data_type, self) {
            (DataType::Uint16, Self::Int(v)) => TypedValue::U16(u16::try_from(v).ok()?),
            (DataType::Int16, Self::Int(v)) => TypedValue::I16(i16::try_from(v).ok()?),
            (DataType::Uint32, Self::Int(v)) => TypedValue::U32(u32::try_from(v).ok()?),
            (DataType::Int32, Self::Int(v)) => TypedValue::I32(i32::try_from(v).ok()?),
            (DataType::Float32, Self::Int(v)) => TypedValue::F32(v as f32),
            (DataType::Float32, Self::Float(v)) => TypedValue::F32(v as f32),
            (DataType::Float64, Self::Int(v)) => TypedValue::F64(v as f64),
            (DataType::Float64, Self::Float(v)) => TypedValue::F64(v),
            (DataType::Boolean, Self::Bool(v)) => TypedValue::Bool(v),
            (DataType::Boolean, Self::Int(v @ (0 | 1))) => TypedValue::Bool(v == 1),
            _ => return None,
        };
        Some(value)
    }
}

/// One register entry of a device profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub space: RegisterSpace,
    pub address: u16,
    #[serde(rename = "dataType")]
    pub data_type: DataType,
    pub value: ProfileValue,
}

/// A structured device profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub identity: DeviceIdentity,
    #[serde(default)]
    pub registers: Vec<RegisterDefinition>,
}

impl DeviceProfile {
    /// Parse a profile from its JSON document.
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a profile from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// The emulated slave device.
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    identity: DeviceIdentity,
    bank: RegisterBank,
}

impl Device {
    /// Build a device from a parsed profile.
    ///
    /// Overlapping or out-of-bounds register definitions and values that
    /// do not fit their data type are load-time errors.
    pub fn from_profile(profile: &DeviceProfile) -> Result<Self, ProfileError> {
        let mut bank = RegisterBank::new(BankMode::Profile);
        for definition in &profile.registers {
            let register = TypedRegister {
                space: definition.space,
                address: definition.address,
                data_type: definition.data_type,
            };
            let value =
                definition
                    .value
                    .to_typed(definition.data_type)
                    .ok_or(ProfileError::ValueType {
                        space: definition.space,
                        address: definition.address,
                        data_type: definition.data_type.name(),
                    })?;
            bank.define(register, value)?;
        }
        Ok(Self {
            name: profile.name.clone(),
            identity: profile.identity.clone(),
            bank,
        })
    }

    /// Build a wide-open simulator device: every address of every space
    /// is valid and word spaces answer with the address itself.
    #[must_use]
    pub fn wide(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: DeviceIdentity::default(),
            bank: RegisterBank::new(BankMode::Wide),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    #[must_use]
    pub const fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut RegisterBank {
        &mut self.bank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"{
        "name": "Sim",
        "description": "Test profile",
        "identity": {
            "vendorName": "ACME",
            "productCode": "SIM-1",
            "majorMinorRevision": "1.0"
        },
        "registers": [
            { "name": "speed", "type": "HoldingRegister", "address": 10, "dataType": "uint16", "value": 1234 },
            { "type": "HoldingRegister", "address": 20, "dataType": "float32", "value": 1.5 },
            { "type": "InputRegister", "address": 5, "dataType": "int32", "value": -7 },
            { "type": "Coil", "address": 3, "dataType": "boolean", "value": true }
        ]
    }"#;

    #[test]
    fn parse_profile() {
        let profile = DeviceProfile::from_json(PROFILE).unwrap();
        assert_eq!(profile.name, "Sim");
        assert_eq!(profile.identity.vendor_name, "ACME");
        assert_eq!(profile.identity.vendor_url, "");
        assert_eq!(profile.registers.len(), 4);
        assert_eq!(profile.registers[0].name.as_deref(), Some("speed"));
        assert_eq!(profile.registers[0].space, RegisterSpace::HoldingRegister);
        assert_eq!(profile.registers[0].data_type, DataType::Uint16);
        assert_eq!(profile.registers[0].value, ProfileValue::Int(1234));
    }

    #[test]
    fn build_device_from_profile() {
        let profile = DeviceProfile::from_json(PROFILE).unwrap();
        let device = Device::from_profile(&profile).unwrap();

        assert_eq!(device.name(), "Sim");
        assert_eq!(
            device
                .bank()
                .read_words(RegisterSpace::HoldingRegister, 10, 1)
                .unwrap(),
            vec![1234]
        );
        assert_eq!(
            device
                .bank()
                .read_words(RegisterSpace::HoldingRegister, 20, 2)
                .unwrap(),
            vec![0x3FC0, 0x0000]
        );
        assert_eq!(
            device
                .bank()
                .read_bits(RegisterSpace::Coil, 3, 1)
                .unwrap(),
            vec![true]
        );
        assert!(!device
            .bank()
            .address_valid(RegisterSpace::HoldingRegister, 11));
    }

    #[test]
    fn overlapping_profile_is_rejected() {
        let json = r#"{
            "name": "Bad",
            "registers": [
                { "type": "HoldingRegister", "address": 10, "dataType": "uint32", "value": 1 },
                { "type": "HoldingRegister", "address": 11, "dataType": "uint16", "value": 2 }
            ]
        }"#;
        let profile = DeviceProfile::from_json(json).unwrap();
        let err = Device::from_profile(&profile).unwrap_err();
        assert!(matches!(err, ProfileError::Overlap { address: 11, .. }));
    }

    #[test]
    fn value_type_mismatch_is_rejected() {
        let json = r#"{
            "name": "Bad",
            "registers": [
                { "type": "HoldingRegister", "address": 10, "dataType": "uint16", "value": 70000 }
            ]
        }"#;
        let profile = DeviceProfile::from_json(json).unwrap();
        assert!(matches!(
            Device::from_profile(&profile).unwrap_err(),
            ProfileError::ValueType { address: 10, .. }
        ));
    }

    #[test]
    fn identity_object_lookup() {
        let identity = DeviceIdentity {
            vendor_name: "ACME".into(),
            ..DeviceIdentity::default()
        };
        assert_eq!(identity.object(0), Some("ACME"));
        assert_eq!(identity.object(3), Some(""));
        assert_eq!(identity.object(7), None);
    }

    #[test]
    fn profile_value_coercion() {
        assert_eq!(
            ProfileValue::Int(1234).to_typed(DataType::Uint16),
            Some(TypedValue::U16(1234))
        );
        assert_eq!(ProfileValue::Int(-1).to_typed(DataType::Uint16), None);
        assert_eq!(
            ProfileValue::Float(1.5).to_typed(DataType::Float64),
            Some(TypedValue::F64(1.5))
        );
        assert_eq!(ProfileValue::Float(1.5).to_typed(DataType::Int32), None);
        assert_eq!(
            ProfileValue::Int(1).to_typed(DataType::Boolean),
            Some(TypedValue::Bool(true))
        );
    }
}
