//! Device identification protocol
//!
//! A device announces itself with one line of six `;`-separated fields:
//!
//! ```text
//! CompanyName;ProductName;ProductModel;ManufactureDate;ProductId;FirmwareVersion
//! ```
//!
//! There is no quoting or escaping, so a field cannot contain `;`. Anything
//! that does not have exactly six non-blank fields is ignored and the device
//! is checked again on its next message.

use crate::device::Device;
use crate::types::{DeviceProperties, DeviceStatus};

/// Stateless classifier for identification lines
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceIdentifier;

impl DeviceIdentifier {
    /// Parse an identification line
    ///
    /// Trailing line terminators are ignored; field contents are taken
    /// verbatim.
    pub fn parse(text: &str) -> Option<DeviceProperties> {
        let line = text.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split(';').collect();

        if fields.len() != DeviceProperties::FIELD_COUNT
            || fields.iter().any(|f| f.trim().is_empty())
        {
            return None;
        }

        Some(DeviceProperties {
            company_name: fields[0].to_string(),
            product_name: fields[1].to_string(),
            product_model: fields[2].to_string(),
            manufacture_date: fields[3].to_string(),
            product_id: fields[4].to_string(),
            firmware_version: fields[5].to_string(),
        })
    }

    /// Try to identify a connected device from one of its messages
    ///
    /// Returns the properties when the device transitioned to `Identified`.
    /// Devices that are not `Connected` are left alone.
    pub fn apply(device: &mut Device, text: &str) -> Option<DeviceProperties> {
        if device.status != DeviceStatus::Connected {
            return None;
        }

        let properties = Self::parse(text)?;
        match device.set_properties(properties.clone()) {
            Ok(()) => {
                device.status = DeviceStatus::Identified;
                tracing::info!("{} identified as {}", device.port, properties);
                Some(properties)
            }
            Err(e) => {
                tracing::warn!("Ignoring identification line on {}: {}", device.port, e);
                None
            }
        }
    }
}
