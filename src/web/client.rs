use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::web::state::AppState;

pub const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiting identity of the caller: the peer IP, else [`UNKNOWN_CLIENT`].
/// The first `X-Forwarded-For` entry takes precedence only when
/// `web.trust_forwarded_for` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn from_parts(parts: &Parts, trust_forwarded_for: bool) -> Self {
        if trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|first| !first.is_empty());
            if let Some(first) = forwarded {
                return ClientId(first.to_string());
            }
        }

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return ClientId(addr.ip().to_string());
        }

        ClientId(UNKNOWN_CLIENT.to_string())
    }
}

impl FromRequestParts<Arc<AppState>> for ClientId {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts, state.config.web.trust_forwarded_for))
    }
}
