use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::db::{queries, AppState};
use crate::models::{Organization, User};
use crate::util::extract_bearer_token;

/// Authenticated account-API caller, inserted as a request extension by
/// [`session_auth`].
#[derive(Clone)]
pub struct UserContext {
    pub user: User,
    pub organization: Organization,
}

/// Bearer session-token authentication for the account API. Expired sessions
/// fail the lookup and land on 401 like a bad token.
pub async fn session_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer_token(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let user = queries::get_user_by_session_token(&conn, token)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let organization = queries::get_organization_by_id(&conn, &user.organization_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    request
        .extensions_mut()
        .insert(UserContext { user, organization });

    Ok(next.run(request).await)
}
