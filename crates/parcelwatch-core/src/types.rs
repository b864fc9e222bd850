use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{ParcelwatchError, Result};

/// Provider-assigned shipment reference, e.g. `E121101188`.
///
/// Always stored uppercase: one ASCII letter followed by 8–10 digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingNumber(String);

impl TrackingNumber {
    pub fn parse(raw: &str) -> Result<Self> {
        let candidate = raw.trim().to_ascii_uppercase();
        let mut chars = candidate.chars();
        let valid = match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {
                let digits = chars.as_str();
                (8..=10).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
            }
            _ => false,
        };
        if !valid {
            return Err(ParcelwatchError::InvalidTrackingNumber {
                value: raw.to_string(),
            });
        }
        Ok(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TrackingNumber {
    type Err = ParcelwatchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One line of the provider's tracking history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(alias = "detalle", default, deserialize_with = "null_as_empty")]
    pub detail: String,
    #[serde(alias = "fecha", default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn new(detail: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// Shipment state as reported by the tracking provider.
///
/// Field names on the wire follow the provider's JSON; absent or `null`
/// text fields decode to empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingReport {
    #[serde(rename = "origen", default, deserialize_with = "null_as_empty")]
    pub origin: String,
    #[serde(rename = "destino", default, deserialize_with = "null_as_empty")]
    pub destination: String,
    #[serde(rename = "estado_actual", default, deserialize_with = "null_as_empty")]
    pub current_state: String,
    #[serde(rename = "fecha_admision", default)]
    pub admission_time: Option<String>,
    #[serde(rename = "remitente_nombre", default)]
    pub sender: Option<String>,
    #[serde(rename = "destinatario_nombre", default)]
    pub recipient: Option<String>,
    #[serde(rename = "historial", default, deserialize_with = "null_as_default")]
    pub history: Vec<HistoryEntry>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
