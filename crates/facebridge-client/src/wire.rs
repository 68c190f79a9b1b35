//! Peer wire format
//!
//! Every message in both directions is a JSON envelope:
//!
//! ```json
//! {"apiName": "VTubeStudioPublicAPI", "apiVersion": "1.0",
//!  "requestID": "fb-1", "messageType": "AuthenticationRequest", "data": {}}
//! ```
//!
//! Responses echo the request ID; failures come back as `APIError`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClientError, ClientResult};

pub const API_NAME: &str = "VTubeStudioPublicAPI";
pub const API_VERSION: &str = "1.0";

// ============================================================================
// Message types
// ============================================================================

pub const API_STATE_REQUEST: &str = "APIStateRequest";
pub const API_STATE_RESPONSE: &str = "APIStateResponse";
pub const TOKEN_REQUEST: &str = "AuthenticationTokenRequest";
pub const TOKEN_RESPONSE: &str = "AuthenticationTokenResponse";
pub const AUTH_REQUEST: &str = "AuthenticationRequest";
pub const AUTH_RESPONSE: &str = "AuthenticationResponse";
pub const PARAMETER_CREATION_REQUEST: &str = "ParameterCreationRequest";
pub const PARAMETER_CREATION_RESPONSE: &str = "ParameterCreationResponse";
pub const INJECT_REQUEST: &str = "InjectParameterDataRequest";
pub const INJECT_RESPONSE: &str = "InjectParameterDataResponse";
pub const API_ERROR: &str = "APIError";

/// Message envelope shared by requests and responses
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub api_name: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(rename = "requestID", default)]
    pub request_id: String,
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    fn new(request_id: &str, message_type: &str, data: Value) -> Self {
        Envelope {
            api_name: API_NAME.to_string(),
            api_version: API_VERSION.to_string(),
            timestamp: None,
            request_id: request_id.to_string(),
            message_type: message_type.to_string(),
            data,
        }
    }

    /// Build a request envelope
    pub fn request(request_id: &str, body: &Request) -> Self {
        Self::new(request_id, body.message_type(), body.data())
    }

    /// Build a response envelope (used by peers and test doubles)
    pub fn response<T: Serialize>(request_id: &str, message_type: &str, data: &T) -> Self {
        Self::new(
            request_id,
            message_type,
            serde_json::to_value(data).unwrap_or(Value::Null),
        )
    }

    pub fn api_error(request_id: &str, error_id: i64, message: &str) -> Self {
        Self::response(
            request_id,
            API_ERROR,
            &ApiError {
                error_id,
                message: message.to_string(),
            },
        )
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> ClientResult<Self> {
        serde_json::from_str(text).map_err(|e| ClientError::Malformed(e.to_string()))
    }

    /// Deserialize the payload
    pub fn data_as<T: DeserializeOwned>(&self) -> ClientResult<T> {
        T::deserialize(&self.data).map_err(|e| {
            ClientError::Malformed(format!("{} payload: {}", self.message_type, e))
        })
    }

    /// Turn an `APIError` into `Err`, then check the message type
    pub fn expect(self, message_type: &str) -> ClientResult<Self> {
        if self.message_type == API_ERROR {
            let err: ApiError = self.data_as()?;
            return Err(ClientError::Api {
                error_id: err.error_id,
                message: err.message,
            });
        }
        if self.message_type != message_type {
            return Err(ClientError::UnexpectedResponse {
                expected: message_type.to_string(),
                found: self.message_type,
            });
        }
        Ok(self)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Requests the client sends
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    ApiState,
    AuthenticationToken(PluginInfo),
    Authentication(AuthenticationData),
    ParameterCreation(ParameterCreation),
    InjectParameterData(InjectParameterData),
}

impl Request {
    pub fn message_type(&self) -> &'static str {
        match self {
            Request::ApiState => API_STATE_REQUEST,
            Request::AuthenticationToken(_) => TOKEN_REQUEST,
            Request::Authentication(_) => AUTH_REQUEST,
            Request::ParameterCreation(_) => PARAMETER_CREATION_REQUEST,
            Request::InjectParameterData(_) => INJECT_REQUEST,
        }
    }

    fn data(&self) -> Value {
        let value = match self {
            Request::ApiState => Ok(Value::Object(Default::default())),
            Request::AuthenticationToken(d) => serde_json::to_value(d),
            Request::Authentication(d) => serde_json::to_value(d),
            Request::ParameterCreation(d) => serde_json::to_value(d),
            Request::InjectParameterData(d) => serde_json::to_value(d),
        };
        value.unwrap_or(Value::Null)
    }
}

/// Plugin identity shown to the user when a token is requested
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub plugin_name: String,
    pub plugin_developer: String,
    /// Base64 PNG, 128x128
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_icon: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationData {
    pub plugin_name: String,
    pub plugin_developer: String,
    pub authentication_token: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterCreation {
    pub parameter_name: String,
    pub explanation: String,
    pub min: f64,
    pub max: f64,
    pub default_value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectParameterData {
    pub face_found: bool,
    pub mode: String,
    pub parameter_values: Vec<ParameterValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub id: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(rename = "errorID")]
    pub error_id: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiState {
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "vTubeStudioVersion", default)]
    pub version: String,
    #[serde(default)]
    pub current_session_authenticated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIssued {
    pub authentication_token: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResult {
    pub authenticated: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterCreated {
    pub parameter_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_shape() {
        let req = Request::Authentication(AuthenticationData {
            plugin_name: "FaceBridge".to_string(),
            plugin_developer: "dev".to_string(),
            authentication_token: "tok".to_string(),
        });
        let json: Value = serde_json::from_str(&Envelope::request("fb-7", &req).encode()).unwrap();
        assert_eq!(json["apiName"], API_NAME);
        assert_eq!(json["apiVersion"], "1.0");
        assert_eq!(json["requestID"], "fb-7");
        assert_eq!(json["messageType"], AUTH_REQUEST);
        assert_eq!(json["data"]["authenticationToken"], "tok");
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_inject_omits_missing_weight() {
        let req = Request::InjectParameterData(InjectParameterData {
            face_found: true,
            mode: "set".to_string(),
            parameter_values: vec![
                ParameterValue { id: "A".to_string(), value: 1.5, weight: None },
                ParameterValue { id: "B".to_string(), value: 0.0, weight: Some(0.5) },
            ],
        });
        let json: Value = serde_json::from_str(&Envelope::request("1", &req).encode()).unwrap();
        let values = json["data"]["parameterValues"].as_array().unwrap();
        assert!(values[0].get("weight").is_none());
        assert_eq!(values[1]["weight"], 0.5);
        assert_eq!(json["data"]["faceFound"], true);
    }

    #[test]
    fn test_api_error_becomes_err() {
        let env = Envelope::api_error("x", 50, "User denied");
        let decoded = Envelope::decode(&env.encode()).unwrap();
        match decoded.expect(TOKEN_RESPONSE) {
            Err(ClientError::Api { error_id, .. }) => assert_eq!(error_id, 50),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_type() {
        let env = Envelope::response("x", AUTH_RESPONSE, &AuthenticationResult {
            authenticated: true,
            reason: String::new(),
        });
        assert!(matches!(
            env.expect(TOKEN_RESPONSE),
            Err(ClientError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_decode_peer_response() {
        let text = r#"{
            "apiName": "VTubeStudioPublicAPI", "apiVersion": "1.0", "timestamp": 1625405710728,
            "requestID": "fb-1", "messageType": "APIStateResponse",
            "data": {"active": true, "vTubeStudioVersion": "1.9.0", "currentSessionAuthenticated": false}
        }"#;
        let env = Envelope::decode(text).unwrap().expect(API_STATE_RESPONSE).unwrap();
        let state: ApiState = env.data_as().unwrap();
        assert!(state.active);
        assert_eq!(state.version, "1.9.0");
        assert_eq!(env.timestamp, Some(1625405710728));
    }
}
