use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Business/account identifier. Partition key for caches, breakers and
// schedule data. Upstream accepts both numeric and string ids, so ids written
// as plain integers go over the wire as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        TenantId(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        TenantId::new(id)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        TenantId::new(id)
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        TenantId(id.to_string())
    }
}

impl Serialize for TenantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Only canonical integers go out as numbers; "007" stays a string
        match self.0.parse::<i64>() {
            Ok(numeric) if numeric.to_string() == self.0 => serializer.serialize_i64(numeric),
            _ => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => Ok(TenantId(n.to_string())),
            serde_json::Value::String(s) => Ok(TenantId::new(s)),
            serde_json::Value::Null => Ok(TenantId::default()),
            other => Err(serde::de::Error::custom(format!(
                "tenant id must be a number or string, got {}",
                other
            ))),
        }
    }
}
