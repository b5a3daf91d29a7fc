//! Saved connection records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ossportable_common::{ConnectionId, Credentials, Error, Provider, Result};

use crate::protocol::BucketTarget;

/// One configured bucket credential set for one provider.
///
/// Servers do not say which provider a record belongs to, so `provider`
/// is always injected by the client from the endpoint that returned it.
/// Everything else the server sends is kept as an opaque record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    /// Server-assigned id; absent until the connection is saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ConnectionId>,
    /// Provider the record was fetched from.
    pub provider: Provider,
    /// Remaining provider-specific fields, as returned by the server.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Connection {
    /// Build a connection from a raw server record.
    ///
    /// Any `provider` field inside the payload is discarded in favour of
    /// the provider the record was fetched from.
    ///
    /// # Errors
    /// - `id` is present but neither a number nor a string
    pub fn from_record(provider: Provider, mut record: Map<String, Value>) -> Result<Self> {
        record.remove("provider");
        let id = match record.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<ConnectionId>(raw).map_err(|e| {
                Error::Serialization(format!("Invalid connection id: {}", e))
            })?),
        };
        Ok(Self {
            id,
            provider,
            fields: record,
        })
    }

    fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Display name, if the server stores one.
    pub fn name(&self) -> Option<&str> {
        self.field_str("name")
    }

    /// Bucket (or container) name.
    pub fn bucket(&self) -> Option<&str> {
        self.field_str("bucket")
    }

    /// Stored credential blob.
    pub fn credentials(&self) -> Option<Credentials> {
        self.field_str("credentials").map(Credentials::new)
    }

    /// Address this connection's bucket for object operations.
    pub fn target(&self) -> Option<BucketTarget> {
        Some(BucketTarget::new(
            self.provider,
            self.bucket()?,
            self.credentials()?,
        ))
    }
}

/// Fields submitted when creating or updating a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionForm {
    /// Display name.
    pub name: String,
    /// Bucket (or container) name.
    pub bucket: String,
    /// Provider credential blob.
    pub credentials: Credentials,
    /// Additional provider-specific form fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectionForm {
    /// Create a form with the fields every provider accepts.
    pub fn new(name: impl Into<String>, bucket: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            credentials,
            extra: Map::new(),
        }
    }

    /// Add a provider-specific field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_provider_comes_from_caller_not_payload() {
        let conn = Connection::from_record(
            Provider::Aws,
            record(json!({"id": 7, "name": "logs", "bucket": "b1", "provider": "gcp"})),
        )
        .unwrap();

        assert_eq!(conn.provider, Provider::Aws);
        assert_eq!(conn.id.as_ref().and_then(ConnectionId::as_number), Some(7));
        assert!(!conn.fields.contains_key("provider"));
        assert_eq!(conn.name(), Some("logs"));
        assert_eq!(conn.bucket(), Some("b1"));
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        let result = Connection::from_record(Provider::Gcp, record(json!({"id": [1, 2]})));
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_target_requires_bucket_and_credentials() {
        let conn = Connection::from_record(
            Provider::Azure,
            record(json!({"id": 1, "bucket": "c1", "credentials": "{}"})),
        )
        .unwrap();
        let target = conn.target().unwrap();
        assert_eq!(target.provider, Provider::Azure);
        assert_eq!(target.bucket, "c1");

        let bare = Connection::from_record(Provider::Azure, record(json!({"id": 2}))).unwrap();
        assert!(bare.target().is_none());
    }

    #[test]
    fn test_serialized_connection_carries_provider() {
        let conn = Connection::from_record(
            Provider::Huawei,
            record(json!({"id": 3, "bucket": "obs"})),
        )
        .unwrap();
        let value = serde_json::to_value(&conn).unwrap();
        assert_eq!(value["provider"], "huawei");
        assert_eq!(value["id"], 3);
        assert_eq!(value["bucket"], "obs");
    }

    #[test]
    fn test_form_flattens_extra_fields() {
        let form = ConnectionForm::new("n", "b", Credentials::new("c")).with_field("region", "eu");
        let value = serde_json::to_value(&form).unwrap();
        assert_eq!(value, json!({"name": "n", "bucket": "b", "credentials": "c", "region": "eu"}));
    }
}
