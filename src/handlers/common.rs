use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::ApiError;

/// JSON request body whose rejections use the standard error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}

/// Success envelope: `{success: true, message?, ...payload}`.
///
/// The payload must serialize to a JSON object; its keys are merged into
/// the envelope.
pub fn envelope<T: Serialize>(message: Option<&str>, payload: T) -> Value {
    let mut body = match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) | Err(_) => Map::new(),
        Ok(other) => {
            let mut map = Map::new();
            map.insert("data".into(), other);
            map
        }
    };
    body.insert("success".into(), Value::Bool(true));
    if let Some(message) = message {
        body.insert("message".into(), Value::String(message.to_string()));
    }
    Value::Object(body)
}

/// Standard success response
pub fn success_response<T: Serialize>(payload: T) -> Response {
    (StatusCode::OK, Json(envelope(None, payload))).into_response()
}

pub fn message_response<T: Serialize>(message: &str, payload: T) -> Response {
    (StatusCode::OK, Json(envelope(Some(message), payload))).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(message: &str, payload: T) -> Response {
    (StatusCode::CREATED, Json(envelope(Some(message), payload))).into_response()
}

/// `{success: true, message}` with nothing else.
pub fn ack(message: &str) -> Response {
    message_response(message, json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_merges_payload_keys() {
        let body = envelope(Some("Order placed successfully"), json!({"paymentMethod": "cod"}));
        assert_eq!(
            body,
            json!({
                "success": true,
                "message": "Order placed successfully",
                "paymentMethod": "cod"
            })
        );
    }

    #[test]
    fn non_object_payload_lands_under_data() {
        let body = envelope(None, vec![1, 2]);
        assert_eq!(body, json!({"success": true, "data": [1, 2]}));
    }
}
