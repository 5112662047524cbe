use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ParseError;

const PACKAGE_PREFIX: &str = "package:";
const VERSION_CODE_KEY: &str = "versionCode=";
const VERSION_NAME_KEY: &str = "versionName=";
const FIRST_INSTALL_TIME_KEY: &str = "firstInstallTime=";
const INSTALL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Metadata of an installed Android package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    pub package_name: String,
    pub display_name: String,
    /// Kept verbatim; legacy packages report non-numeric codes.
    pub version_code: String,
    pub display_version: String,
    pub publisher: String,
    /// PNG-encoded icon, empty when unknown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub display_icon: Vec<u8>,
    pub install_date: NaiveDate,
    pub capabilities: Vec<String>,
}

/// Package names from `pm list packages` output, in listing order.
pub fn parse_package_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix(PACKAGE_PREFIX))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpValue<'a> {
    Found(&'a str),
    KeyMissing,
    ValueUnterminated,
}

/// Looks up `key` in a `dumpsys package` dump. The value runs up to the next whitespace.
pub fn extract_dump_value<'a>(dump: &'a str, key: &str) -> DumpValue<'a> {
    let Some(index) = dump.find(key) else {
        return DumpValue::KeyMissing;
    };
    let rest = &dump[index + key.len()..];
    match rest.find(char::is_whitespace) {
        Some(end) => DumpValue::Found(&rest[..end]),
        None => DumpValue::ValueUnterminated,
    }
}

pub fn parse_package_dump(
    serial: &str,
    package: &str,
    dump: &str,
) -> Result<PackageInfo, ParseError> {
    let version_code = required_value(serial, package, dump, VERSION_CODE_KEY)?.to_string();
    let display_version = required_value(serial, package, dump, VERSION_NAME_KEY)?.to_string();
    let raw_install = required_value(serial, package, dump, FIRST_INSTALL_TIME_KEY)?;
    let install_date = NaiveDate::parse_from_str(raw_install, INSTALL_DATE_FORMAT).map_err(
        |source| ParseError::InvalidDumpValue {
            key: FIRST_INSTALL_TIME_KEY,
            value: raw_install.to_string(),
            package: package.to_string(),
            serial: serial.to_string(),
            source,
        },
    )?;

    Ok(PackageInfo {
        package_name: package.to_string(),
        display_name: String::new(),
        version_code,
        display_version,
        publisher: String::new(),
        display_icon: Vec::new(),
        install_date,
        capabilities: Vec::new(),
    })
}

fn required_value<'a>(
    serial: &str,
    package: &str,
    dump: &'a str,
    key: &'static str,
) -> Result<&'a str, ParseError> {
    match extract_dump_value(dump, key) {
        DumpValue::Found(value) => Ok(value),
        DumpValue::KeyMissing => Err(ParseError::DumpKeyMissing {
            key,
            package: package.to_string(),
            serial: serial.to_string(),
        }),
        DumpValue::ValueUnterminated => Err(ParseError::DumpValueUnterminated {
            key,
            package: package.to_string(),
            serial: serial.to_string(),
        }),
    }
}
