//! Caller identification for the mini-app API.
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Query, Request},
};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::Error;

/// Validate the `initData` string the Telegram client attaches to mini-app requests.
///
/// Signature verification is not performed. Every payload, including a missing one, is accepted.
pub(crate) fn validate_init_data(init_data: Option<&str>) -> bool {
    debug!(present = init_data.is_some(), "accepting mini-app init data without verification");
    true
}

#[derive(Deserialize, Default)]
struct AdminId {
    admin_tg_id: Option<i64>,
}

/// An admin request: the claimed operator id plus the raw JSON body.
///
/// The id comes from the `admin_tg_id` query parameter, or from an `admin_tg_id` field of the
/// body. It is not checked here. The body is only decoded by [`AdminRequest::json`], so a
/// handler can authorize the caller before it looks at the payload.
#[derive(Debug, Clone)]
pub(crate) struct AdminRequest {
    caller: Option<i64>,
    body: Bytes,
}

impl AdminRequest {
    /// The operator id claimed by the caller.
    pub(crate) fn caller(&self) -> Option<i64> {
        self.caller
    }

    /// Decode the body. Malformed bodies are rejected with `400 Bad Request`.
    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(Error::bad_request)
    }
}

impl<S: Send + Sync> FromRequest<S> for AdminRequest {
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let Query(query) = Query::<AdminId>::from_request_parts(&mut parts, state)
            .await
            .map_err(Error::bad_request)?;
        let body = Bytes::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(Error::bad_request)?;

        // An unreadable body carries no id. It is rejected later, once the caller is known.
        let caller = query.admin_tg_id.or_else(|| {
            serde_json::from_slice::<AdminId>(&body)
                .unwrap_or_default()
                .admin_tg_id
        });
        Ok(Self { caller, body })
    }
}
