use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Reply codes. Upstream statuses are relayed verbatim alongside these.
pub mod codes {
    pub const AUTHED: u16 = 200;
    pub const ACCEPTED: u16 = 201;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const SERVER_ERROR: u16 = 500;
}

// ── Reply frame ──────────────────────────────────────────────────────────────

/// A JSON frame sent from the gateway to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
}

impl ReplyFrame {
    fn message(code: u16, msg: &str) -> Self {
        Self {
            code,
            msg: Some(msg.to_string()),
            data: None,
            request_id: None,
        }
    }

    pub fn hello() -> Self {
        Self::message(codes::AUTHED, "authed")
    }

    pub fn unauthorized() -> Self {
        Self::message(codes::UNAUTHORIZED, "Unauthorized")
    }

    pub fn incomplete() -> Self {
        Self::message(codes::BAD_REQUEST, "Incomplete")
    }

    pub fn data_format_error() -> Self {
        Self::message(codes::BAD_REQUEST, "Data Format Error, must be json")
    }

    pub fn unsupported_method() -> Self {
        Self::message(codes::METHOD_NOT_ALLOWED, "Unsupported Method")
    }

    pub fn module_not_found() -> Self {
        Self::message(codes::NOT_FOUND, "Module Not Found")
    }

    pub fn too_many_requests() -> Self {
        Self::message(codes::TOO_MANY_REQUESTS, "Too Many Requests")
    }

    pub fn server_error() -> Self {
        Self::message(codes::SERVER_ERROR, "Server Error")
    }

    /// Acknowledgment sent before the upstream call is issued.
    pub fn accepted(request_id: Value) -> Self {
        Self {
            code: codes::ACCEPTED,
            msg: None,
            data: None,
            request_id: Some(request_id),
        }
    }

    /// Upstream result relayed to the client. `data` is always serialized,
    /// as `null` when the upstream body was empty.
    pub fn result(status: u16, data: Value, request_id: Value) -> Self {
        Self {
            code: status,
            msg: None,
            data: Some(data),
            request_id: Some(request_id),
        }
    }

    /// Attach the correlating request id.
    pub fn for_request(mut self, request_id: Value) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!(r#"{{"code":{}}}"#, self.code))
    }
}
