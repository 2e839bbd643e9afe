//! # Data Model
//!
//! Types exchanged between the supervisor core and its collaborators.
//!
//! - [`Registration`]: identity the module registers with
//! - [`ActivationDirective`]: one activate/deactivate instruction
//! - [`EndpointDescriptor`]: complete configuration of one connection
//! - [`DesiredState`]: the document the management plane serves per module
//! - [`ReportedState`]: what the module reports back once it applied one

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity parameters used when registering the module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Role name (e.g. "supervisor")
    pub role: String,

    /// Optional site tag grouping modules at one location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,

    /// Module type (e.g. "OpcTwin")
    pub module_type: String,
}

/// Desired activation state for a single connection.
///
/// An absent or empty token means "deactivate"; anything else is an
/// activation candidate whose token still has to pass base64 validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationDirective {
    pub connection_id: String,
    pub token: Option<String>,
}

impl ActivationDirective {
    pub fn activate(connection_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            token: Some(token.into()),
        }
    }

    pub fn deactivate(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            token: None,
        }
    }

    pub fn is_deactivation(&self) -> bool {
        self.token.as_deref().is_none_or(str::is_empty)
    }

    /// Interprets one entry of an inbound property bag.
    ///
    /// Null and string values produce a directive; any other JSON type
    /// carries no intent and yields `None`.
    pub fn from_property(key: &str, value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::deactivate(key)),
            Value::String(token) => Some(Self {
                connection_id: key.to_string(),
                token: Some(token.clone()),
            }),
            _ => None,
        }
    }
}

/// Kind of user credential presented to a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialType {
    None,
    UserName,
    X509Certificate,
    JwtToken,
}

/// Message security mode for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityMode {
    Best,
    Sign,
    SignAndEncrypt,
    None,
}

/// User credential attached to a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(rename = "type", default)]
    pub credential_type: Option<CredentialType>,

    /// Opaque credential payload (password object, token, ...)
    #[serde(default)]
    pub value: Option<Value>,
}

/// Full configuration of one endpoint connection.
///
/// Always sent whole; the owning service never receives field patches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    /// Target address of the server
    #[serde(default)]
    pub url: Option<String>,

    /// User credential, `None` for anonymous access
    #[serde(default)]
    pub user: Option<Credential>,

    /// Security mode, `None` lets the service pick the best one
    #[serde(default)]
    pub security_mode: Option<SecurityMode>,

    /// Security policy URI, `None` lets the service pick the best one
    #[serde(default)]
    pub security_policy: Option<String>,

    /// Pinned server certificate thumbprint, `None` trusts any
    #[serde(default, with = "base64_bytes")]
    pub server_thumbprint: Option<Vec<u8>>,

    /// Client certificate used when connecting
    #[serde(default, with = "base64_bytes")]
    pub client_certificate: Option<Vec<u8>>,
}

/// Response to a module registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRegistered {
    pub module_id: String,
}

/// Desired state served by the management plane for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    /// Monotonic document version; unchanged versions are not re-applied
    pub version: u64,

    /// Plane asks for a clean re-registration
    #[serde(default)]
    pub restart: bool,

    /// Supervisor property bag: connection id → token (plus `Connected`)
    #[serde(default)]
    pub supervisor: Map<String, Value>,

    /// Per-connection endpoint settings property bags
    #[serde(default)]
    pub endpoints: BTreeMap<String, Map<String, Value>>,

    /// Discovery tuning, carried verbatim for the discovery owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Value>,
}

/// Effective state a module reports back after applying a desired state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedState {
    /// Desired-state version this report reflects
    pub version: u64,

    /// Whether the plane last reported the module as connected
    #[serde(default)]
    pub connected: bool,

    /// Effective endpoint settings per connection
    #[serde(default)]
    pub endpoints: BTreeMap<String, Map<String, Value>>,
}

/// Serializes optional byte fields as standard base64 strings.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as Base64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_some(&Base64.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| Base64.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
