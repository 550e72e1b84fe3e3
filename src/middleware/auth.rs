use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use serde_json::json;
use uuid::Uuid;

/// Header populated by the fronting identity provider. Requests reach
/// this service already authenticated; we trust the id as-is.
const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, extracted from `X-User-Id`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let unauthorized = || {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "Missing or invalid user identity",
                    "status": StatusCode::UNAUTHORIZED.as_u16()
                })),
            )
        };

        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(unauthorized)?;

        let user_id = Uuid::parse_str(value.trim()).map_err(|_| unauthorized())?;
        Ok(AuthUser(user_id))
    }
}
