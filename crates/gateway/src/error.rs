use serde_json::Value;

use gatehouse_protocol::{ProtocolError, ReplyFrame};

use crate::identity::IdentityError;

/// Every way handling a connection or message can fail, and the reply each
/// one produces.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("no session bound to connection")]
    SessionMissing,
    #[error(transparent)]
    ProtocolViolation(#[from] ProtocolError),
    #[error("module '{module_id}' not found")]
    ResolutionFailure { module_id: String, request_id: Value },
    #[error("user {user_id} is over the rate limit")]
    RateLimited { user_id: String },
    #[error("upstream call failed: {reason}")]
    UpstreamFailure { reason: String, request_id: Value },
    #[error("internal error: {0}")]
    InternalFailure(String),
}

impl GatewayError {
    /// Classify an identity service error raised during the handshake.
    pub fn from_identity(err: &IdentityError) -> Self {
        match err {
            IdentityError::Status(_) | IdentityError::EmptyBody => {
                Self::AuthFailure(err.to_string())
            },
            IdentityError::Transport(_)
            | IdentityError::Malformed
            | IdentityError::MissingUserId => Self::InternalFailure(err.to_string()),
        }
    }

    pub fn to_frame(&self) -> ReplyFrame {
        match self {
            Self::AuthFailure(_) | Self::SessionMissing => ReplyFrame::unauthorized(),
            Self::ProtocolViolation(e) => e.to_frame(),
            Self::ResolutionFailure { request_id, .. } => {
                ReplyFrame::module_not_found().for_request(request_id.clone())
            },
            Self::RateLimited { .. } => ReplyFrame::too_many_requests(),
            Self::UpstreamFailure { request_id, .. } => {
                ReplyFrame::server_error().for_request(request_id.clone())
            },
            Self::InternalFailure(_) => ReplyFrame::server_error(),
        }
    }

    /// Whether the connection must be closed after replying.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Self::AuthFailure(_) | Self::SessionMissing | Self::InternalFailure(_)
        )
    }
}
