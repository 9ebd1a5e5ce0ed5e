//! Request body extractor with the API error envelope.
//!
//! `JsonBody<T>` wraps axum's `Json<T>` so a missing field, a mistyped field
//! or a missing content type answers 400 with `{success:false, code, message}`
//! instead of axum's plain-text 422.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::ApiError;

/// Message returned when a body of this type cannot be decoded.
pub trait InvalidBodyMessage {
    const INVALID_BODY: &'static str;
}

/// JSON body extractor whose rejection is an [`ApiError`].
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + InvalidBodyMessage,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(body_rejection(T::INVALID_BODY, rejection)),
        }
    }
}

fn body_rejection(message: &'static str, rejection: JsonRejection) -> ApiError {
    let reason = rejection.body_text();
    tracing::debug!(status = %rejection.status(), reason = %reason, "Request body rejected");
    ApiError::validation_failed(message).with_details(json!({ "reason": reason }))
}
