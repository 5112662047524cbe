use serde::Serialize;

use crate::error::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Offline,
    Device,
    Emulator,
    Unauthorized,
}

impl DeviceType {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        match raw.to_ascii_lowercase().as_str() {
            "offline" => Ok(DeviceType::Offline),
            "device" => Ok(DeviceType::Device),
            "emulator" => Ok(DeviceType::Emulator),
            "unauthorized" => Ok(DeviceType::Unauthorized),
            _ => Err(ParseError::UnknownDeviceType(raw.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Offline => "offline",
            DeviceType::Device => "device",
            DeviceType::Emulator => "emulator",
            DeviceType::Unauthorized => "unauthorized",
        }
    }
}

/// One row of `adb devices -l`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct KnownDevice {
    pub serial_number: String,
    pub device_type: DeviceType,
    pub product_code: String,
    pub model_number: String,
    pub device_code: String,
    pub transport_id: String,
}

impl KnownDevice {
    pub fn is_offline(&self) -> bool {
        self.device_type == DeviceType::Offline
    }

    pub fn is_device(&self) -> bool {
        self.device_type == DeviceType::Device
    }

    pub fn is_emulator(&self) -> bool {
        self.device_type == DeviceType::Emulator
    }

    pub fn is_unauthorized(&self) -> bool {
        self.device_type == DeviceType::Unauthorized
    }
}

/// Parses the full output of `adb devices -l`, header line included.
pub fn parse_device_list(output: &str) -> Result<Vec<KnownDevice>, ParseError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .skip(1)
        .map(parse_device_line)
        .collect()
}

pub fn parse_device_line(line: &str) -> Result<KnownDevice, ParseError> {
    let parts: Vec<&str> = line
        .split(' ')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() < 2 {
        return Err(ParseError::InvalidDeviceLine(line.to_string()));
    }

    let properties = &parts[2..];
    Ok(KnownDevice {
        serial_number: parts[0].to_string(),
        device_type: DeviceType::parse(parts[1])?,
        product_code: find_property(properties, "product"),
        model_number: find_property(properties, "model"),
        device_code: find_property(properties, "device"),
        transport_id: find_property(properties, "transport_id"),
    })
}

fn find_property(properties: &[&str], key: &str) -> String {
    properties
        .iter()
        .find_map(|part| {
            part.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix(':'))
        })
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_device() {
        let devices = parse_device_list(
            "List of devices attached\nsn1 device product:p1 model:m1 device:d1 transport_id:1",
        )
        .unwrap();

        assert_eq!(
            devices,
            vec![KnownDevice {
                serial_number: "sn1".into(),
                device_type: DeviceType::Device,
                product_code: "p1".into(),
                model_number: "m1".into(),
                device_code: "d1".into(),
                transport_id: "1".into(),
            }]
        );
        assert!(devices[0].is_device());
    }

    #[test]
    fn header_only_yields_no_devices() {
        assert!(parse_device_list("List of devices attached\n\n")
            .unwrap()
            .is_empty());
        assert!(parse_device_list("").unwrap().is_empty());
    }

    #[test]
    fn keeps_enumeration_order_and_handles_crlf() {
        let output = "List of devices attached\r\n\
                      emulator-5554  emulator product:sdk model:sdk_phone transport_id:3\r\n\
                      localhost:58526 offline\r\n\
                      R58M12ABCDE    unauthorized usb:1-1 transport_id:7\r\n";
        let devices = parse_device_list(output).unwrap();

        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].serial_number, "emulator-5554");
        assert!(devices[0].is_emulator());
        assert_eq!(devices[0].model_number, "sdk_phone");
        assert_eq!(devices[1].serial_number, "localhost:58526");
        assert!(devices[1].is_offline());
        assert_eq!(devices[1].product_code, "");
        assert_eq!(devices[1].transport_id, "");
        assert!(devices[2].is_unauthorized());
        assert_eq!(devices[2].transport_id, "7");
    }

    #[test]
    fn property_order_does_not_matter_and_first_match_wins() {
        let device =
            parse_device_line("sn1 DEVICE transport_id:9 model:a model:b device:x").unwrap();
        assert_eq!(device.device_type, DeviceType::Device);
        assert_eq!(device.model_number, "a");
        assert_eq!(device.device_code, "x");
        assert_eq!(device.transport_id, "9");
        assert_eq!(device.product_code, "");
    }

    #[test]
    fn rejects_line_without_type() {
        let err = parse_device_list("List of devices attached\nsn1").unwrap_err();
        assert!(matches!(err, ParseError::InvalidDeviceLine(_)));
        assert!(err.to_string().contains("Invalid adb device line"));
    }

    #[test]
    fn rejects_unknown_device_type() {
        let err = parse_device_line("sn1 unknown").unwrap_err();
        assert!(matches!(err, ParseError::UnknownDeviceType(ref value) if value == "unknown"));
        assert_eq!(err.to_string(), "Device type 'unknown' is unknown!");
    }
}
