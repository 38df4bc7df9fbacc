//! Serial number → device type resolution.

use serde::{Deserialize, Serialize};

/// Separator between the device type and the unit number (`LNA6213-001`).
pub const DEFAULT_SEPARATOR: char = '-';

/// Known device-type prefixes for serials written without a separator
/// (`LNA6213002`). Checked in this order and the first match wins, so a
/// prefix must come before any shorter prefix it starts with.
pub const KNOWN_DEVICE_TYPES: &[&str] = &[
    "LNA6213",
    "LNP4216",
    "LNP6118",
    "LNA2124",
    "LNA2322",
    "LNA6112",
    "LN53S-FC",
    "LN65S-FC",
    "LNLVL-IM-Z",
    "LNP4217",
    "LNP6119",
    "LNQ4314",
];

/// Derives a device type from a serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTypeResolver {
    separator: char,
    prefixes: Vec<String>,
}

impl Default for DeviceTypeResolver {
    fn default() -> Self {
        Self::new(
            DEFAULT_SEPARATOR,
            KNOWN_DEVICE_TYPES.iter().map(|p| p.to_string()).collect(),
        )
    }
}

impl DeviceTypeResolver {
    /// `prefixes` are checked in the given order.
    pub fn new(separator: char, prefixes: Vec<String>) -> Self {
        Self {
            separator,
            prefixes,
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Resolve the device type of `serial_number`.
    ///
    /// A serial containing the separator resolves to the text before the
    /// first separator; otherwise the first known prefix the serial starts
    /// with is returned. `None` means the type is unknown.
    pub fn resolve(&self, serial_number: &str) -> Option<String> {
        if let Some((device_type, _)) = serial_number.split_once(self.separator) {
            if device_type.is_empty() {
                return None;
            }
            return Some(device_type.to_string());
        }
        self.prefixes
            .iter()
            .find(|prefix| !prefix.is_empty() && serial_number.starts_with(prefix.as_str()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_takes_text_before_first_separator() {
        let r = DeviceTypeResolver::default();
        assert_eq!(r.resolve("LNA6213-001").as_deref(), Some("LNA6213"));
        assert_eq!(r.resolve("XYZ-1-2").as_deref(), Some("XYZ"));
        // Types containing the separator are cut at the first one.
        assert_eq!(r.resolve("LN53S-FC-004").as_deref(), Some("LN53S"));
    }

    #[test]
    fn known_prefix_without_separator() {
        let r = DeviceTypeResolver::default();
        assert_eq!(r.resolve("LNA6213002").as_deref(), Some("LNA6213"));
        assert_eq!(r.resolve("LNQ4314777").as_deref(), Some("LNQ4314"));
    }

    #[test]
    fn unmatched_serial_is_unknown() {
        let r = DeviceTypeResolver::default();
        assert_eq!(r.resolve("ABC123"), None);
        assert_eq!(r.resolve(""), None);
        assert_eq!(r.resolve("-001"), None);
    }

    #[test]
    fn enumeration_order_beats_longest_match() {
        let r = DeviceTypeResolver::new('-', vec!["LNP42".into(), "LNP4216".into()]);
        assert_eq!(r.resolve("LNP4216001").as_deref(), Some("LNP42"));

        let r = DeviceTypeResolver::new('-', vec!["LNP4216".into(), "LNP42".into()]);
        assert_eq!(r.resolve("LNP4216001").as_deref(), Some("LNP4216"));
        assert_eq!(r.resolve("LNP4299001").as_deref(), Some("LNP42"));
    }

    #[test]
    fn custom_separator() {
        let r = DeviceTypeResolver::new('_', Vec::new());
        assert_eq!(r.resolve("LNA6213_9").as_deref(), Some("LNA6213"));
        assert_eq!(r.resolve("LNA6213-9"), None);
    }
}
