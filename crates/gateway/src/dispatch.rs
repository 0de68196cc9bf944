//! Per-message pipeline: session check, rate check, validation, module
//! resolution, acknowledgment, then the outbound call on its own task.

use std::sync::Arc;

use {
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

use {
    gatehouse_config::RejectMode,
    gatehouse_protocol::{InboundMessage, ReplyFrame},
};

use crate::{
    error::GatewayError,
    state::GatewayState,
    throttle::Admission,
    upstream::{ForwardRequest, UpstreamOutcome},
};

/// Handle one raw client payload.
///
/// Replies for rejected messages are sent before returning. When the
/// message is accepted the 201 ack is sent and the handle of the spawned
/// upstream call is returned; that task sends the result and gives the rate
/// slot back.
pub async fn on_message(
    state: &Arc<GatewayState>,
    conn_id: &str,
    raw: &str,
) -> Option<JoinHandle<()>> {
    let Some(session) = state.session(conn_id).await else {
        let err = GatewayError::SessionMissing;
        warn!(conn_id, "message on unauthenticated connection");
        state.close_client(conn_id, Some(err.to_frame())).await;
        return None;
    };
    let user_id = session.user_id.as_str();

    let admission = state.limiter.admit(user_id).await;
    if admission == Admission::Throttled {
        let err = GatewayError::RateLimited {
            user_id: user_id.to_string(),
        };
        info!(conn_id, user_id, "message throttled");
        if state.reject_mode == RejectMode::Reply {
            state.send_to(conn_id, &err.to_frame()).await;
        }
        return None;
    }

    let resolved = match InboundMessage::parse(raw) {
        Ok(message) => match state.registry.lookup(&message.module_id).await {
            Some(module) => Ok((message, module)),
            None => Err(GatewayError::ResolutionFailure {
                module_id: message.module_id,
                request_id: message.request_id,
            }),
        },
        Err(e) => Err(GatewayError::from(e)),
    };
    let (message, module) = match resolved {
        Ok(pair) => pair,
        Err(e) => {
            debug!(conn_id, user_id, error = %e, "message rejected");
            state.send_to(conn_id, &e.to_frame()).await;
            return None;
        },
    };

    let request = ForwardRequest::build(&module, &message, &session);
    let request_id = message.request_id;
    state
        .send_to(conn_id, &ReplyFrame::accepted(request_id.clone()))
        .await;
    debug!(
        conn_id,
        user_id,
        module_id = %module.id,
        request_id = %request_id,
        method = %request.method,
        "forwarding request"
    );

    let state = Arc::clone(state);
    let conn_id = conn_id.to_string();
    let user_id = user_id.to_string();
    Some(tokio::spawn(async move {
        let reply = match state.upstream.forward(&request).await {
            UpstreamOutcome::Response { status, body } => {
                ReplyFrame::result(status, body, request_id)
            },
            UpstreamOutcome::Failed(reason) => {
                let err = GatewayError::UpstreamFailure { reason, request_id };
                warn!(
                    conn_id,
                    user_id,
                    url = %request.url,
                    error = %err,
                    "module call failed"
                );
                err.to_frame()
            },
        };
        state.send_to(&conn_id, &reply).await;
        if admission == Admission::Admitted {
            state.limiter.release(&user_id).await;
        }
    }))
}
