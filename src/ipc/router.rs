use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const CHAIN: [TryHandle; 12] = [
    handlers::core::try_handle,
    handlers::classes::try_handle,
    handlers::subjects::try_handle,
    handlers::sessions::try_handle,
    handlers::students::try_handle,
    handlers::attendance::try_handle,
    handlers::grades::try_handle,
    handlers::homework::try_handle,
    handlers::schedule::try_handle,
    handlers::settings::try_handle,
    handlers::years::try_handle,
    handlers::exchange::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");
    for try_handle in CHAIN {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    tracing::warn!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
