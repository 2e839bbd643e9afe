//! # Endpoint Settings Applier
//!
//! Receives partial property updates for a connection, merges them onto the
//! connection's effective settings and pushes the resulting
//! [`EndpointDescriptor`] to the [`EndpointServices`] collaborator in one
//! call.
//!
//! # Property bag
//!
//! | Property            | Value                         | Null / empty   |
//! |---------------------|-------------------------------|----------------|
//! | `EndpointUrl`       | string                        | clears         |
//! | `Credential`        | any JSON                      | clears         |
//! | `CredentialType`    | `None`, `UserName`, ...       | clears         |
//! | `SecurityPolicy`    | string                        | clears         |
//! | `SecurityMode`      | `Best`, `Sign`, ...           | clears         |
//! | `ServerThumbprint`  | chunked base64 (see [`chunked`](crate::chunked)) | clears |
//! | `ClientCertificate` | chunked base64                | clears         |
//!
//! Missing properties leave the field as it was. Values of the wrong shape
//! are treated as if the property was missing.
//!
//! # Atomicity
//!
//! The merged settings only become effective once `set_endpoint` succeeds.
//! On failure the previous settings stay in place and the error is returned.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chunked;
use crate::models::{Credential, CredentialType, EndpointDescriptor, SecurityMode};
use crate::services::{EndpointServices, ServiceError};

pub const ENDPOINT_URL: &str = "EndpointUrl";
pub const CREDENTIAL: &str = "Credential";
pub const CREDENTIAL_TYPE: &str = "CredentialType";
pub const SECURITY_POLICY: &str = "SecurityPolicy";
pub const SECURITY_MODE: &str = "SecurityMode";
pub const SERVER_THUMBPRINT: &str = "ServerThumbprint";
pub const CLIENT_CERTIFICATE: &str = "ClientCertificate";

/// Errors from applying endpoint settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to push endpoint settings for {connection_id}: {source}")]
    Push {
        connection_id: String,
        #[source]
        source: ServiceError,
    },
}

/// Change to a single settings field.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    /// Leave the field as it is
    #[default]
    Keep,
    /// Unset the field
    Clear,
    /// Replace the field
    Set(T),
}

impl<T> Patch<T> {
    fn merge_into(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *slot = None,
            Patch::Set(value) => *slot = Some(value),
        }
    }
}

/// A partial update of [`EndpointSettings`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointSettingsUpdate {
    pub endpoint_url: Patch<String>,
    pub credential: Patch<Value>,
    pub credential_type: Patch<CredentialType>,
    pub security_policy: Patch<String>,
    pub security_mode: Patch<SecurityMode>,
    pub server_thumbprint: Patch<Vec<u8>>,
    pub client_certificate: Patch<Vec<u8>>,
}

impl EndpointSettingsUpdate {
    /// Builds an update from an inbound property bag.
    pub fn from_properties(properties: &Map<String, Value>) -> Self {
        Self {
            endpoint_url: text_patch(properties.get(ENDPOINT_URL)),
            credential: match properties.get(CREDENTIAL) {
                None => Patch::Keep,
                Some(Value::Null) => Patch::Clear,
                Some(value) => Patch::Set(value.clone()),
            },
            credential_type: enum_patch(CREDENTIAL_TYPE, properties.get(CREDENTIAL_TYPE)),
            security_policy: text_patch(properties.get(SECURITY_POLICY)),
            security_mode: enum_patch(SECURITY_MODE, properties.get(SECURITY_MODE)),
            server_thumbprint: bytes_patch(SERVER_THUMBPRINT, properties.get(SERVER_THUMBPRINT)),
            client_certificate: bytes_patch(CLIENT_CERTIFICATE, properties.get(CLIENT_CERTIFICATE)),
        }
    }
}

fn text_patch(value: Option<&Value>) -> Patch<String> {
    match value {
        None => Patch::Keep,
        Some(Value::Null) => Patch::Clear,
        Some(Value::String(s)) if s.is_empty() => Patch::Clear,
        Some(Value::String(s)) => Patch::Set(s.clone()),
        Some(_) => Patch::Keep,
    }
}

fn enum_patch<T: DeserializeOwned>(name: &str, value: Option<&Value>) -> Patch<T> {
    match value {
        None => Patch::Keep,
        Some(Value::Null) => Patch::Clear,
        Some(Value::String(s)) if s.is_empty() => Patch::Clear,
        Some(value) => match T::deserialize(value) {
            Ok(parsed) => Patch::Set(parsed),
            Err(err) => {
                warn!(property = name, error = %err, "ignoring malformed property");
                Patch::Keep
            }
        },
    }
}

fn bytes_patch(name: &str, value: Option<&Value>) -> Patch<Vec<u8>> {
    match value {
        None => Patch::Keep,
        Some(Value::Null) => Patch::Clear,
        Some(Value::Object(chunks)) => match chunked::decode(chunks) {
            Ok(bytes) if bytes.is_empty() => Patch::Clear,
            Ok(bytes) => Patch::Set(bytes),
            Err(err) => {
                warn!(property = name, error = %err, "ignoring malformed property");
                Patch::Keep
            }
        },
        Some(_) => Patch::Keep,
    }
}

/// Effective settings of one connection, as merged so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointSettings {
    pub endpoint_url: Option<String>,
    pub credential: Option<Value>,
    pub credential_type: Option<CredentialType>,
    pub security_policy: Option<String>,
    pub security_mode: Option<SecurityMode>,
    pub server_thumbprint: Option<Vec<u8>>,
    pub client_certificate: Option<Vec<u8>>,
}

impl EndpointSettings {
    /// Returns a copy with `update` applied.
    pub fn merged(&self, update: EndpointSettingsUpdate) -> Self {
        let mut next = self.clone();
        update.endpoint_url.merge_into(&mut next.endpoint_url);
        update.credential.merge_into(&mut next.credential);
        update.credential_type.merge_into(&mut next.credential_type);
        update.security_policy.merge_into(&mut next.security_policy);
        update.security_mode.merge_into(&mut next.security_mode);
        update.server_thumbprint.merge_into(&mut next.server_thumbprint);
        update.client_certificate.merge_into(&mut next.client_certificate);
        next
    }

    /// Builds the descriptor pushed to the endpoint service.
    ///
    /// Without a credential type, or with type `None`, no credential is sent
    /// even if a credential value is set.
    pub fn to_descriptor(&self) -> EndpointDescriptor {
        let user = match self.credential_type {
            None | Some(CredentialType::None) => None,
            Some(credential_type) => Some(Credential {
                credential_type: Some(credential_type),
                value: self.credential.clone(),
            }),
        };
        EndpointDescriptor {
            url: self.endpoint_url.clone(),
            user,
            security_mode: self.security_mode,
            security_policy: self.security_policy.clone(),
            server_thumbprint: self.server_thumbprint.clone(),
            client_certificate: self.client_certificate.clone(),
        }
    }

    /// Encodes the settings back into property-bag form.
    pub fn to_properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert(ENDPOINT_URL.into(), optional_json(&self.endpoint_url));
        properties.insert(CREDENTIAL.into(), self.credential.clone().unwrap_or(Value::Null));
        properties.insert(CREDENTIAL_TYPE.into(), optional_json(&self.credential_type));
        properties.insert(SECURITY_POLICY.into(), optional_json(&self.security_policy));
        properties.insert(SECURITY_MODE.into(), optional_json(&self.security_mode));
        properties.insert(SERVER_THUMBPRINT.into(), optional_chunks(&self.server_thumbprint));
        properties.insert(CLIENT_CERTIFICATE.into(), optional_chunks(&self.client_certificate));
        properties
    }
}

fn optional_json<T: serde::Serialize>(value: &Option<T>) -> Value {
    value
        .as_ref()
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(Value::Null)
}

fn optional_chunks(bytes: &Option<Vec<u8>>) -> Value {
    match bytes {
        Some(bytes) => Value::Object(chunked::encode(bytes)),
        None => Value::Null,
    }
}

/// Merges partial updates and pushes whole descriptors per connection.
pub struct EndpointSettingsApplier {
    endpoints: Arc<dyn EndpointServices>,
    settings: Mutex<HashMap<String, EndpointSettings>>,
}

impl EndpointSettingsApplier {
    pub fn new(endpoints: Arc<dyn EndpointServices>) -> Self {
        Self {
            endpoints,
            settings: Mutex::new(HashMap::new()),
        }
    }

    /// Merges `update` onto the connection's settings and pushes the result.
    ///
    /// Returns the descriptor that was pushed.
    pub async fn apply(
        &self,
        connection_id: &str,
        update: EndpointSettingsUpdate,
    ) -> Result<EndpointDescriptor, SettingsError> {
        let mut settings = self.settings.lock().await;
        let next = settings
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
            .merged(update);
        let descriptor = next.to_descriptor();

        self.endpoints
            .set_endpoint(connection_id, &descriptor)
            .await
            .map_err(|source| {
                warn!(connection = %connection_id, error = %source, "endpoint update rejected");
                SettingsError::Push {
                    connection_id: connection_id.to_string(),
                    source,
                }
            })?;

        settings.insert(connection_id.to_string(), next);
        info!(connection = %connection_id, url = ?descriptor.url, "endpoint settings applied");
        Ok(descriptor)
    }

    /// Convenience wrapper parsing a property bag first.
    pub async fn apply_properties(
        &self,
        connection_id: &str,
        properties: &Map<String, Value>,
    ) -> Result<EndpointDescriptor, SettingsError> {
        self.apply(connection_id, EndpointSettingsUpdate::from_properties(properties))
            .await
    }

    /// Effective settings for `connection_id`, if any were applied.
    pub async fn current(&self, connection_id: &str) -> Option<EndpointSettings> {
        self.settings.lock().await.get(connection_id).cloned()
    }

    /// Effective settings encoded as a property bag.
    pub async fn properties(&self, connection_id: &str) -> Option<Map<String, Value>> {
        self.current(connection_id)
            .await
            .map(|settings| settings.to_properties())
    }

    /// Forgets the settings of a connection that went away.
    pub async fn forget(&self, connection_id: &str) -> Option<EndpointSettings> {
        self.settings.lock().await.remove(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_properties_keep_fields() {
        let update = EndpointSettingsUpdate::from_properties(&Map::new());
        assert_eq!(update, EndpointSettingsUpdate::default());
    }

    #[test]
    fn test_null_and_empty_clear_text_fields() {
        let bag = json!({ "EndpointUrl": "", "SecurityPolicy": null });
        let update = EndpointSettingsUpdate::from_properties(bag.as_object().unwrap());
        assert_eq!(update.endpoint_url, Patch::Clear);
        assert_eq!(update.security_policy, Patch::Clear);
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let bag = json!({
            "EndpointUrl": 17,
            "SecurityMode": "Bogus",
            "CredentialType": ["UserName"],
            "ServerThumbprint": "not-a-chunk-map",
            "ClientCertificate": { "0": "AQ==", "5": "Ag==" },
        });
        let update = EndpointSettingsUpdate::from_properties(bag.as_object().unwrap());
        assert_eq!(update, EndpointSettingsUpdate::default());
    }

    #[test]
    fn test_enum_and_bytes_parse() {
        let bag = json!({
            "SecurityMode": "SignAndEncrypt",
            "CredentialType": "X509Certificate",
            "ServerThumbprint": { "0": "AQID" },
        });
        let update = EndpointSettingsUpdate::from_properties(bag.as_object().unwrap());
        assert_eq!(update.security_mode, Patch::Set(SecurityMode::SignAndEncrypt));
        assert_eq!(update.credential_type, Patch::Set(CredentialType::X509Certificate));
        assert_eq!(update.server_thumbprint, Patch::Set(vec![1, 2, 3]));
    }

    #[test]
    fn test_descriptor_drops_credential_without_type() {
        let settings = EndpointSettings {
            credential: Some(json!("secret")),
            ..Default::default()
        };
        assert!(settings.to_descriptor().user.is_none());

        let settings = EndpointSettings {
            credential: Some(json!("secret")),
            credential_type: Some(CredentialType::None),
            ..Default::default()
        };
        assert!(settings.to_descriptor().user.is_none());

        let settings = EndpointSettings {
            credential: Some(json!("secret")),
            credential_type: Some(CredentialType::JwtToken),
            ..Default::default()
        };
        let user = settings.to_descriptor().user.unwrap();
        assert_eq!(user.credential_type, Some(CredentialType::JwtToken));
        assert_eq!(user.value, Some(json!("secret")));
    }

    #[test]
    fn test_properties_encode_back() {
        let settings = EndpointSettings {
            endpoint_url: Some("opc.tcp://plc:4840".to_string()),
            security_mode: Some(SecurityMode::Sign),
            client_certificate: Some(vec![9, 8, 7]),
            ..Default::default()
        };
        let properties = settings.to_properties();
        assert_eq!(properties[ENDPOINT_URL], "opc.tcp://plc:4840");
        assert_eq!(properties[SECURITY_MODE], "Sign");
        assert!(properties[SERVER_THUMBPRINT].is_null());
        assert_eq!(properties[CLIENT_CERTIFICATE], json!({ "0": "CQgH" }));

        let reparsed = EndpointSettings::default()
            .merged(EndpointSettingsUpdate::from_properties(&properties));
        assert_eq!(reparsed, settings);
    }
}
