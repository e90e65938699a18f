//! Message envelope parsing.
//!
//! An envelope is the JSON description of one relay request carried as a
//! stream message value. Parsing is strict: every problem found is collected
//! into a single [`RelayError::MalformedEnvelope`] and such an envelope is
//! never dispatched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{RelayError, RelayResult};

/// Wire field holding the target URL.
pub const FIELD_TARGET_URL: &str = "targetRestApi";
/// Wire field holding the HTTP operation.
pub const FIELD_OPERATION: &str = "targetRestApiOperation";
/// Wire field holding the request payload.
pub const FIELD_PAYLOAD: &str = "targetRestApiPayload";
/// Wire field holding the request headers.
pub const FIELD_HEADERS: &str = "targetRestApiHeaders";
/// Wire field holding a secret name.
pub const FIELD_SECRET_NAME: &str = "vaultSecretName";
/// Wire field holding a secret ID.
pub const FIELD_SECRET_ID: &str = "vaultSecretId";

/// HTTP operation requested by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// HTTP PUT with the payload as body.
    Put,
    /// HTTP POST with the payload as body.
    Post,
    /// HTTP DELETE without a body.
    Delete,
}

impl Operation {
    /// Returns the wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Put => "PUT",
            Operation::Post => "POST",
            Operation::Delete => "DELETE",
        }
    }

    /// Whether requests for this operation carry the payload.
    pub fn carries_body(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUT" => Ok(Operation::Put),
            "POST" => Ok(Operation::Post),
            "DELETE" => Ok(Operation::Delete),
            other => Err(RelayError::MalformedEnvelope(format!(
                "{} '{}' is not one of PUT, POST, DELETE",
                FIELD_OPERATION, other
            ))),
        }
    }
}

/// One outbound header. Names may repeat within an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl Header {
    /// Creates a header.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Reference to a credential held in the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecretRef {
    /// Secret addressed by name inside the configured vault.
    Name(String),
    /// Secret addressed by its ID.
    Id(String),
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Name(name) => write!(f, "name:{}", name),
            SecretRef::Id(id) => write!(f, "id:{}", id),
        }
    }
}

/// A validated relay request.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Target URL, not validated beyond being a string.
    pub target_url: String,
    /// HTTP operation.
    pub operation: Operation,
    /// Payload; `None` means an empty body.
    pub payload: Option<Value>,
    /// Headers in wire order.
    pub headers: Vec<Header>,
    /// Per-message credential, if any.
    pub credential: Option<SecretRef>,
}

impl Envelope {
    /// Creates an envelope without payload, headers or credential.
    pub fn new(target_url: impl Into<String>, operation: Operation) -> Self {
        Self {
            target_url: target_url.into(),
            operation,
            payload: None,
            headers: Vec::new(),
            credential: None,
        }
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Sets the credential reference.
    pub fn with_credential(mut self, credential: SecretRef) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Parses raw message bytes into an envelope.
    pub fn parse(raw: &[u8]) -> RelayResult<Self> {
        let value: Value = serde_json::from_slice(raw)?;
        let object = value
            .as_object()
            .ok_or_else(|| RelayError::MalformedEnvelope("envelope is not a JSON object".into()))?;

        let mut problems = Vec::new();

        let target_url = match object.get(FIELD_TARGET_URL) {
            Some(Value::String(url)) => Some(url.clone()),
            None | Some(Value::Null) => {
                problems.push(format!("{} is missing", FIELD_TARGET_URL));
                None
            }
            Some(_) => {
                problems.push(format!("{} must be a string", FIELD_TARGET_URL));
                None
            }
        };

        let operation = match object.get(FIELD_OPERATION) {
            Some(Value::String(op)) => match op.parse::<Operation>() {
                Ok(op) => Some(op),
                Err(e) => {
                    problems.push(reason(e));
                    None
                }
            },
            None | Some(Value::Null) => {
                problems.push(format!("{} is missing", FIELD_OPERATION));
                None
            }
            Some(other) => {
                problems.push(format!(
                    "{} '{}' is not one of PUT, POST, DELETE",
                    FIELD_OPERATION, other
                ));
                None
            }
        };

        let payload = match object.get(FIELD_PAYLOAD) {
            None | Some(Value::Null) => None,
            Some(payload) => Some(payload.clone()),
        };

        let headers = match object.get(FIELD_HEADERS) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => parse_headers(entries, &mut problems),
            Some(_) => {
                problems.push(format!("{} must be an array", FIELD_HEADERS));
                Vec::new()
            }
        };

        let credential = parse_credential(object, &mut problems);

        match (target_url, operation) {
            (Some(target_url), Some(operation)) if problems.is_empty() => Ok(Self {
                target_url,
                operation,
                payload,
                headers,
                credential,
            }),
            _ => Err(RelayError::MalformedEnvelope(problems.join("; "))),
        }
    }

    /// Returns the serialized request body, if the operation carries one.
    pub fn body(&self) -> Option<String> {
        if !self.operation.carries_body() {
            return None;
        }
        Some(self.payload.as_ref().map(Value::to_string).unwrap_or_default())
    }
}

fn reason(err: RelayError) -> String {
    match err {
        RelayError::MalformedEnvelope(reason) => reason,
        other => other.to_string(),
    }
}

fn parse_headers(entries: &[Value], problems: &mut Vec<String>) -> Vec<Header> {
    let mut headers = Vec::with_capacity(entries.len());

    for (idx, entry) in entries.iter().enumerate() {
        let Some(fields) = entry.as_object() else {
            problems.push(format!("{}[{}] is not an object", FIELD_HEADERS, idx));
            continue;
        };

        let name = fields.get("key").or_else(|| fields.get("name"));
        let name = match name {
            Some(Value::String(name)) => Some(name.clone()),
            _ => {
                problems.push(format!("{}[{}] has no key", FIELD_HEADERS, idx));
                None
            }
        };

        let value = match fields.get("value") {
            Some(Value::String(value)) => Some(value.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            None | Some(Value::Null) => {
                problems.push(format!("{}[{}] has no value", FIELD_HEADERS, idx));
                None
            }
            Some(_) => {
                problems.push(format!("{}[{}] value must be a string", FIELD_HEADERS, idx));
                None
            }
        };

        if let (Some(name), Some(value)) = (name, value) {
            headers.push(Header { name, value });
        }
    }

    headers
}

fn parse_credential(object: &Map<String, Value>, problems: &mut Vec<String>) -> Option<SecretRef> {
    let mut text = |field: &str| match object.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            problems.push(format!("{} must be a string", field));
            None
        }
    };

    let id = text(FIELD_SECRET_ID);
    let name = text(FIELD_SECRET_NAME);

    id.map(SecretRef::Id).or(name.map(SecretRef::Name))
}
