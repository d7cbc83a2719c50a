//! Identity and attribute value types.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::InventoryError;

/// Literal the hypervisor reports when a guest attribute is not available.
const UNKNOWN: &str = "unknown";

/// Literal the hypervisor reports when a VM has no readable UUID.
const NOT_AVAILABLE: &str = "N/A";

/// Map a provider attribute to `None` when it is missing, empty or "unknown".
pub fn known_value(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(UNKNOWN) {
        return None;
    }
    Some(value.to_string())
}

// =============================================================================
// UUID
// =============================================================================

/// Hypervisor-assigned VM UUID.
///
/// Stable across renames and power cycles; the join key for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmUuid(String);

impl VmUuid {
    /// Parse a UUID, rejecting empty strings and provider placeholders.
    pub fn parse(raw: &str) -> Result<Self, InventoryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InventoryError::EmptyUuid);
        }
        if trimmed.eq_ignore_ascii_case(NOT_AVAILABLE) || trimmed.eq_ignore_ascii_case(UNKNOWN) {
            return Err(InventoryError::PlaceholderUuid(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Parse an optional provider value, treating placeholders as absent.
    pub fn from_observed(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|s| Self::parse(s).ok())
    }

    /// Get the UUID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for VmUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for VmUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Identity
// =============================================================================

/// The key a record is stored and looked up under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VmIdentity {
    /// Preferred: the hypervisor UUID.
    Uuid(VmUuid),

    /// Fallback when the UUID is unavailable.
    Name(String),
}

impl VmIdentity {
    /// Build an identity from an optional UUID and a name.
    ///
    /// Returns `None` when neither is usable.
    pub fn resolve(uuid: Option<&VmUuid>, name: &str) -> Option<Self> {
        match uuid {
            Some(uuid) => Some(Self::Uuid(uuid.clone())),
            None if !name.trim().is_empty() => Some(Self::Name(name.to_string())),
            None => None,
        }
    }
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(uuid) => write!(f, "uuid:{uuid}"),
            Self::Name(name) => write!(f, "name:{name}"),
        }
    }
}

// =============================================================================
// Power state
// =============================================================================

/// VM power state as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PowerState {
    /// Powered on.
    On,

    /// Powered off.
    Off,

    /// Any other literal (e.g. "suspended"), kept verbatim.
    Other(String),

    /// The provider did not report a state.
    #[default]
    Unknown,
}

impl PowerState {
    /// Parse a provider or stored literal.
    pub fn from_observed(raw: &str) -> Self {
        match raw.trim() {
            "on" | "poweredOn" => Self::On,
            "off" | "poweredOff" => Self::Off,
            "" => Self::Unknown,
            s if s.eq_ignore_ascii_case(UNKNOWN) => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Other(s) => s,
            Self::Unknown => UNKNOWN,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PowerState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PowerState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_observed(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("421c0f4e-aa", true)]
    #[case("", false)]
    #[case("   ", false)]
    #[case("N/A", false)]
    #[case("unknown", false)]
    #[case("UNKNOWN", false)]
    fn test_uuid_parse(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(VmUuid::parse(raw).is_ok(), valid);
    }

    #[test]
    fn test_uuid_placeholder_error() {
        let err = VmUuid::parse("N/A").unwrap_err();
        assert_eq!(err, InventoryError::PlaceholderUuid("N/A".to_string()));
    }

    #[rstest]
    #[case("poweredOn", PowerState::On)]
    #[case("on", PowerState::On)]
    #[case("poweredOff", PowerState::Off)]
    #[case("off", PowerState::Off)]
    #[case("suspended", PowerState::Other("suspended".to_string()))]
    #[case("", PowerState::Unknown)]
    fn test_power_state_from_observed(#[case] raw: &str, #[case] expected: PowerState) {
        assert_eq!(PowerState::from_observed(raw), expected);
    }

    #[test]
    fn test_power_state_serializes_as_literal() {
        let json = serde_json::to_string(&PowerState::Other("suspended".into())).unwrap();
        assert_eq!(json, "\"suspended\"");
        let back: PowerState = serde_json::from_str("\"on\"").unwrap();
        assert_eq!(back, PowerState::On);
    }

    #[rstest]
    #[case(Some("web-01"), Some("web-01"))]
    #[case(Some("unknown"), None)]
    #[case(Some(""), None)]
    #[case(None, None)]
    fn test_known_value(#[case] raw: Option<&str>, #[case] expected: Option<&str>) {
        assert_eq!(known_value(raw).as_deref(), expected);
    }

    #[test]
    fn test_identity_prefers_uuid() {
        let uuid = VmUuid::parse("u1").unwrap();
        assert_eq!(
            VmIdentity::resolve(Some(&uuid), "vm1"),
            Some(VmIdentity::Uuid(uuid))
        );
        assert_eq!(
            VmIdentity::resolve(None, "vm1"),
            Some(VmIdentity::Name("vm1".to_string()))
        );
        assert_eq!(VmIdentity::resolve(None, "  "), None);
    }
}
