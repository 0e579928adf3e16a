//! Measurement descriptors and per-device schema registration.
//!
//! Registration is append-only: re-registering an identical descriptor is a
//! no-op, anything else that differs is a [`TsFileError::SchemaConflict`].

use crate::compression::compressor_for;
use crate::encoding::EncodingParams;
use crate::error::{Result, TsFileError};
use crate::io::{write_str, ByteReader};
use crate::types::{CompressionType, TSDataType, TSEncoding};
use std::collections::BTreeMap;
use std::io::Write;

/// Descriptor of one measurement column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementSchema {
    /// Measurement name, unique within its device.
    pub name: String,
    /// Logical data type.
    pub data_type: TSDataType,
    /// Value encoding.
    pub encoding: TSEncoding,
    /// Compression of the encoded values.
    pub compression: CompressionType,
    /// Encoder parameters such as `max_point_number`.
    pub props: BTreeMap<String, String>,
}

impl MeasurementSchema {
    /// Creates a plain, uncompressed measurement.
    pub fn new(name: impl Into<String>, data_type: TSDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            encoding: TSEncoding::Plain,
            compression: CompressionType::Uncompressed,
            props: BTreeMap::new(),
        }
    }

    /// Sets the encoding.
    pub fn with_encoding(mut self, encoding: TSEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the compression.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Adds an encoder parameter.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Parsed encoder parameters.
    pub fn encoding_params(&self) -> Result<EncodingParams> {
        EncodingParams::from_props(&self.props)
    }

    /// Checks that the name is usable in a path and that the encoding,
    /// compression and parameters are all supported.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('.') {
            return Err(TsFileError::InvalidParameter {
                key: "measurement".to_string(),
                value: self.name.clone(),
            });
        }
        if !self.encoding.supports(self.data_type) {
            return Err(TsFileError::UnsupportedEncoding {
                data_type: self.data_type,
                encoding: self.encoding,
            });
        }
        compressor_for(self.compression)?;
        self.encoding_params()?;
        Ok(())
    }

    /// Serializes the descriptor.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_str(writer, &self.name)?;
        writer.write_all(&[
            self.data_type as u8,
            self.encoding as u8,
            self.compression as u8,
        ])?;
        writer.write_all(&(self.props.len() as u16).to_le_bytes())?;
        for (key, value) in &self.props {
            write_str(writer, key)?;
            write_str(writer, value)?;
        }
        Ok(())
    }

    /// Parses a descriptor written by [`write_to`](Self::write_to).
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let name = reader.read_str()?;
        let raw_type = reader.read_u8()?;
        let data_type = TSDataType::from_u8(raw_type).ok_or(TsFileError::UnknownDataTypeId(raw_type))?;
        let raw_encoding = reader.read_u8()?;
        let encoding =
            TSEncoding::from_u8(raw_encoding).ok_or(TsFileError::UnknownEncodingId(raw_encoding))?;
        let raw_compression = reader.read_u8()?;
        let compression = CompressionType::from_u8(raw_compression)
            .ok_or(TsFileError::UnknownCompressionId(raw_compression))?;

        let prop_count = reader.read_u16()?;
        let mut props = BTreeMap::new();
        for _ in 0..prop_count {
            let key = reader.read_str()?;
            let value = reader.read_str()?;
            props.insert(key, value);
        }

        Ok(Self {
            name,
            data_type,
            encoding,
            compression,
            props,
        })
    }

    fn describe_difference(&self, other: &Self) -> String {
        if self.data_type != other.data_type {
            format!("data type {} differs from registered {}", other.data_type, self.data_type)
        } else if self.encoding != other.encoding {
            format!("encoding {:?} differs from registered {:?}", other.encoding, self.encoding)
        } else if self.compression != other.compression {
            format!(
                "compression {:?} differs from registered {:?}",
                other.compression, self.compression
            )
        } else {
            "encoder parameters differ from registered ones".to_string()
        }
    }
}

/// The measurements of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSchema {
    /// Device identifier.
    pub device_id: String,
    /// Whether the measurements share one time column.
    pub aligned: bool,
    /// Measurements in registration order.
    pub measurements: Vec<MeasurementSchema>,
}

impl DeviceSchema {
    /// Creates a device with no measurements.
    pub fn new(device_id: impl Into<String>, aligned: bool) -> Self {
        Self {
            device_id: device_id.into(),
            aligned,
            measurements: Vec::new(),
        }
    }

    /// Adds a measurement (builder style).
    pub fn with_measurement(mut self, measurement: MeasurementSchema) -> Self {
        self.measurements.push(measurement);
        self
    }

    /// Position of a measurement in registration order.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.measurements.iter().position(|m| m.name == name)
    }

    /// Looks up a measurement by name.
    pub fn measurement(&self, name: &str) -> Option<&MeasurementSchema> {
        self.measurements.iter().find(|m| m.name == name)
    }

    /// Adds `measurement` or confirms an identical registration.
    /// Returns true if it was new.
    fn merge(&mut self, measurement: MeasurementSchema) -> Result<bool> {
        measurement.validate()?;
        match self.measurement(&measurement.name) {
            Some(existing) if *existing == measurement => Ok(false),
            Some(existing) => Err(TsFileError::SchemaConflict {
                device: self.device_id.clone(),
                measurement: measurement.name.clone(),
                reason: existing.describe_difference(&measurement),
            }),
            None => {
                self.measurements.push(measurement);
                Ok(true)
            }
        }
    }
}

/// Registered devices keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    devices: BTreeMap<String, DeviceSchema>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one measurement on a non-aligned device.
    pub fn register_timeseries(&mut self, device_id: &str, measurement: MeasurementSchema) -> Result<bool> {
        self.register(device_id, false, vec![measurement])
    }

    /// Registers measurements on an aligned device.
    pub fn register_aligned(&mut self, device_id: &str, measurements: Vec<MeasurementSchema>) -> Result<bool> {
        self.register(device_id, true, measurements)
    }

    /// Registers every measurement of a device.
    pub fn register_device(&mut self, device: DeviceSchema) -> Result<bool> {
        self.register(&device.device_id, device.aligned, device.measurements)
    }

    /// Applies all measurements or none. Returns true if anything was added.
    fn register(&mut self, device_id: &str, aligned: bool, measurements: Vec<MeasurementSchema>) -> Result<bool> {
        if device_id.is_empty() {
            return Err(TsFileError::InvalidParameter {
                key: "device".to_string(),
                value: String::new(),
            });
        }

        let mut device = match self.devices.get(device_id) {
            Some(existing) if existing.aligned != aligned => {
                return Err(TsFileError::SchemaConflict {
                    device: device_id.to_string(),
                    measurement: measurements.first().map(|m| m.name.clone()).unwrap_or_default(),
                    reason: format!(
                        "device is registered as {}",
                        if existing.aligned { "aligned" } else { "non-aligned" }
                    ),
                });
            }
            Some(existing) => existing.clone(),
            None => DeviceSchema::new(device_id, aligned),
        };

        let mut changed = !self.devices.contains_key(device_id);
        for measurement in measurements {
            changed |= device.merge(measurement)?;
        }
        self.devices.insert(device_id.to_string(), device);
        Ok(changed)
    }

    /// Looks up a device.
    pub fn device(&self, device_id: &str) -> Option<&DeviceSchema> {
        self.devices.get(device_id)
    }

    /// Looks up a measurement.
    pub fn measurement(&self, device_id: &str, name: &str) -> Option<&MeasurementSchema> {
        self.devices.get(device_id)?.measurement(name)
    }

    /// Iterates devices in identifier order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceSchema> {
        self.devices.values()
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
