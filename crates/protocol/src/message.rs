//! Inbound client messages and their validation.

use std::{fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::frame::ReplyFrame;

// ── Method ───────────────────────────────────────────────────────────────────

/// HTTP methods a client may ask the gateway to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            "put" => Ok(Self::Put),
            "patch" => Ok(Self::Patch),
            "delete" => Ok(Self::Delete),
            other => Err(other.to_string()),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Why an inbound payload was rejected. Once the payload is a JSON object,
/// every variant carries the request id (when the client sent a usable one)
/// so the reply can be correlated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload is empty or not a JSON object")]
    Unparseable,
    #[error("missing or empty field '{field}'")]
    MissingField {
        field: &'static str,
        request_id: Option<Value>,
    },
    #[error("unsupported method '{method}'")]
    UnsupportedMethod { method: String, request_id: Value },
    #[error("'data' must be a JSON object")]
    DataFormat { request_id: Value },
}

impl ProtocolError {
    pub fn request_id(&self) -> Option<&Value> {
        match self {
            Self::UnsupportedMethod { request_id, .. } | Self::DataFormat { request_id } => {
                Some(request_id)
            },
            Self::MissingField { request_id, .. } => request_id.as_ref(),
            Self::Unparseable => None,
        }
    }

    /// The reply a client receives for this rejection.
    pub fn to_frame(&self) -> ReplyFrame {
        let frame = match self {
            Self::Unparseable | Self::MissingField { .. } => ReplyFrame::incomplete(),
            Self::UnsupportedMethod { .. } => ReplyFrame::unsupported_method(),
            Self::DataFormat { .. } => ReplyFrame::data_format_error(),
        };
        match self.request_id() {
            Some(id) => frame.for_request(id.clone()),
            None => frame,
        }
    }
}

// ── Message ──────────────────────────────────────────────────────────────────

/// A validated client request.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub method: HttpMethod,
    /// Module id normalised to its string form (`7` and `"7"` are the same module).
    pub module_id: String,
    pub path: String,
    /// Request body; `{}` when the client sent none.
    pub data: Map<String, Value>,
    /// Client-chosen correlator, echoed back verbatim.
    pub request_id: Value,
}

impl InboundMessage {
    /// Parse and validate a raw client payload.
    ///
    /// Checks run in a fixed order: JSON shape, required fields, method,
    /// then `data`. The first failure wins.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw.trim()).map_err(|_| ProtocolError::Unparseable)?;
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::Unparseable);
        };
        if obj.is_empty() {
            return Err(ProtocolError::Unparseable);
        }

        // Read first so every later rejection can be correlated.
        let request_id = obj
            .remove("request_id")
            .filter(|v| matches!(v, Value::String(_) | Value::Number(_)) && !is_blank(v));
        let missing = |field| ProtocolError::MissingField {
            field,
            request_id: request_id.clone(),
        };

        let method = obj
            .get("method")
            .filter(|v| !is_blank(v))
            .cloned()
            .ok_or_else(|| missing("method"))?;
        let module_id = obj
            .get("module_id")
            .and_then(id_key)
            .ok_or_else(|| missing("module_id"))?;
        let path = obj
            .get("path")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| missing("path"))?;
        let request_id = request_id.ok_or(ProtocolError::MissingField {
            field: "request_id",
            request_id: None,
        })?;

        let method = match &method {
            Value::String(s) => s.parse::<HttpMethod>(),
            other => Err(other.to_string()),
        }
        .map_err(|method| ProtocolError::UnsupportedMethod {
            method,
            request_id: request_id.clone(),
        })?;

        let data = match obj.remove("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(ProtocolError::DataFormat { request_id }),
        };

        Ok(Self {
            method,
            module_id,
            path,
            data,
            request_id,
        })
    }
}

/// Normalise a JSON id (string or number) into a lookup key.
pub fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::codes, serde_json::json};

    fn parse(v: Value) -> Result<InboundMessage, ProtocolError> {
        InboundMessage::parse(&v.to_string())
    }

    #[test]
    fn parses_minimal_message() {
        let msg = parse(json!({
            "method": "GET", "module_id": 7, "path": "list", "request_id": "abc"
        }))
        .unwrap();
        assert_eq!(msg.method, HttpMethod::Get);
        assert_eq!(msg.module_id, "7");
        assert_eq!(msg.path, "list");
        assert!(msg.data.is_empty());
        assert_eq!(msg.request_id, json!("abc"));
    }

    #[test]
    fn keeps_data_object() {
        let msg = parse(json!({
            "method": "post", "module_id": "billing", "path": "charge",
            "request_id": 12, "data": { "amount": 3 }
        }))
        .unwrap();
        assert_eq!(msg.data.get("amount"), Some(&json!(3)));
        assert_eq!(msg.request_id, json!(12));
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert_eq!(InboundMessage::parse(""), Err(ProtocolError::Unparseable));
        assert_eq!(InboundMessage::parse("not json"), Err(ProtocolError::Unparseable));
        assert_eq!(InboundMessage::parse("{}"), Err(ProtocolError::Unparseable));
        assert_eq!(InboundMessage::parse("[1,2]"), Err(ProtocolError::Unparseable));
    }

    #[test]
    fn each_required_field_is_enforced() {
        let full = json!({
            "method": "get", "module_id": 1, "path": "p", "request_id": "r"
        });
        for field in ["method", "module_id", "path", "request_id"] {
            let request_id = (field != "request_id").then(|| json!("r"));
            let expected = Err(ProtocolError::MissingField { field, request_id });

            let mut missing = full.clone();
            missing.as_object_mut().unwrap().remove(field);
            assert_eq!(parse(missing), expected);

            let mut blank = full.clone();
            blank[field] = json!("");
            assert_eq!(parse(blank), expected);
        }
    }

    #[test]
    fn incomplete_reply_echoes_known_request_id() {
        let err = parse(json!({
            "method": "get", "module_id": 1, "request_id": "r4"
        }))
        .unwrap_err();
        let frame = err.to_frame();
        assert_eq!(frame.code, codes::BAD_REQUEST);
        assert_eq!(frame.msg.as_deref(), Some("Incomplete"));
        assert_eq!(frame.request_id, Some(json!("r4")));
    }

    #[test]
    fn missing_fields_reply_incomplete() {
        let err = parse(json!({ "method": "get" })).unwrap_err();
        let frame = err.to_frame();
        assert_eq!(frame.code, codes::BAD_REQUEST);
        assert_eq!(frame.msg.as_deref(), Some("Incomplete"));
        assert_eq!(frame.request_id, None);
    }

    #[test]
    fn method_is_case_insensitive() {
        for m in ["GET", "Post", "pUt", "PATCH", "delete"] {
            let msg = parse(json!({
                "method": m, "module_id": 1, "path": "p", "request_id": "r"
            }))
            .unwrap();
            assert_eq!(msg.method.as_str(), m.to_ascii_lowercase());
        }
    }

    #[test]
    fn unknown_method_is_405_with_request_id() {
        for m in [json!("head"), json!("OPTIONS"), json!(5)] {
            let err = parse(json!({
                "method": m, "module_id": 1, "path": "p", "request_id": "r9"
            }))
            .unwrap_err();
            assert!(matches!(err, ProtocolError::UnsupportedMethod { .. }));
            let frame = err.to_frame();
            assert_eq!(frame.code, codes::METHOD_NOT_ALLOWED);
            assert_eq!(frame.request_id, Some(json!("r9")));
        }
    }

    #[test]
    fn non_object_data_is_format_error() {
        let err = parse(json!({
            "method": "post", "module_id": 1, "path": "p", "request_id": "r", "data": [1]
        }))
        .unwrap_err();
        assert_eq!(err, ProtocolError::DataFormat {
            request_id: json!("r")
        });
        assert_eq!(err.to_frame().code, codes::BAD_REQUEST);
    }

    #[test]
    fn null_data_defaults_to_empty_object() {
        let msg = parse(json!({
            "method": "post", "module_id": 1, "path": "p", "request_id": "r", "data": null
        }))
        .unwrap();
        assert!(msg.data.is_empty());
    }

    #[test]
    fn numeric_and_string_ids_share_a_key() {
        assert_eq!(id_key(&json!(7)), id_key(&json!("7")));
        assert_eq!(id_key(&json!("")), None);
        assert_eq!(id_key(&json!(null)), None);
        assert_eq!(id_key(&json!({ "id": 1 })), None);
    }
}
