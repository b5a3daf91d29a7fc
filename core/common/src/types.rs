//! Common types used throughout ossportable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Object-storage service a connection belongs to.
///
/// The set is closed; the wire code (`gcp`, `aws`, ...) is what gets
/// substituted into `/api/{provider}/...` paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Cloud Storage.
    Gcp,
    /// Amazon S3.
    Aws,
    /// Huawei Cloud OBS.
    Huawei,
    /// Alibaba Cloud OSS.
    Alibaba,
    /// Azure Blob Storage.
    Azure,
}

impl Provider {
    /// Every provider, in registry order.
    pub const ALL: [Provider; 5] = [
        Provider::Gcp,
        Provider::Aws,
        Provider::Huawei,
        Provider::Alibaba,
        Provider::Azure,
    ];

    /// Short wire code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gcp => "gcp",
            Provider::Aws => "aws",
            Provider::Huawei => "huawei",
            Provider::Alibaba => "alibaba",
            Provider::Azure => "azure",
        }
    }

    /// Human readable service name.
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Gcp => "Google Cloud Storage",
            Provider::Aws => "Amazon S3",
            Provider::Huawei => "Huawei OBS",
            Provider::Alibaba => "Alibaba Cloud OSS",
            Provider::Azure => "Azure Blob Storage",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown provider '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(i64),
    Text(String),
}

/// Server-assigned identifier of a saved connection.
///
/// Servers hand out integer row ids today, but the value is treated as
/// opaque: it is only ever echoed back into `/connection/{id}` paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(IdRepr);

impl ConnectionId {
    /// Create an id from a server-side integer key.
    pub fn from_number(id: i64) -> Self {
        Self(IdRepr::Number(id))
    }

    /// Numeric value, when the server assigned one.
    pub fn as_number(&self) -> Option<i64> {
        match &self.0 {
            IdRepr::Number(n) => Some(*n),
            IdRepr::Text(_) => None,
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            IdRepr::Number(n) => write!(f, "{}", n),
            IdRepr::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for ConnectionId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Connection id cannot be empty".to_string(),
            ));
        }
        Ok(match s.parse::<i64>() {
            Ok(n) => Self(IdRepr::Number(n)),
            Err(_) => Self(IdRepr::Text(s.to_string())),
        })
    }
}

impl From<i64> for ConnectionId {
    fn from(id: i64) -> Self {
        Self::from_number(id)
    }
}

/// Provider credential blob, zeroized on drop.
///
/// The content is provider specific (usually a JSON document encoded as a
/// string) and is passed through untouched.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    /// Wrap a raw credential string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw credential string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("gcp".parse::<Provider>().unwrap(), Provider::Gcp);
        assert_eq!(" Azure ".parse::<Provider>().unwrap(), Provider::Azure);
        assert!("gdrive".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_serde_uses_wire_code() {
        let json = serde_json::to_string(&Provider::Huawei).unwrap();
        assert_eq!(json, "\"huawei\"");
        let back: Provider = serde_json::from_str("\"alibaba\"").unwrap();
        assert_eq!(back, Provider::Alibaba);
    }

    #[test]
    fn test_connection_id_accepts_number_and_text() {
        let n: ConnectionId = serde_json::from_str("42").unwrap();
        assert_eq!(n.as_number(), Some(42));
        assert_eq!(n.to_string(), "42");

        let t: ConnectionId = serde_json::from_str("\"abc-1\"").unwrap();
        assert_eq!(t.as_number(), None);
        assert_eq!(t.to_string(), "abc-1");
        assert_eq!(serde_json::to_string(&n).unwrap(), "42");
    }

    #[test]
    fn test_connection_id_empty_fails() {
        assert!("".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("{\"secret\":\"hunter2\"}");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert_eq!(
            serde_json::to_string(&creds).unwrap(),
            "\"{\\\"secret\\\":\\\"hunter2\\\"}\""
        );
    }

    proptest! {
        #[test]
        fn prop_connection_id_display_parses_back(id in any::<i64>()) {
            let parsed: ConnectionId = ConnectionId::from_number(id).to_string().parse().unwrap();
            prop_assert_eq!(parsed.as_number(), Some(id));
        }

        #[test]
        fn prop_provider_code_round_trips(idx in 0usize..5) {
            let provider = Provider::ALL[idx];
            prop_assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
    }
}
