// Route module decomposition — the transport (C8) in its own file,
// shared request guards here, matching the teacher's layout.

mod mcp;

pub use mcp::{health, mcp_delete, mcp_get, mcp_post};

use crate::auth::Authenticator;
use crate::db::Db;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

/// Every `/mcp` request requires `Authorization: Bearer <token>` (§4.8).
/// Missing → 401; failed authentication → 403. Auth faults are never
/// converted to JSON-RPC errors (§7 kind 2).
pub struct AuthenticatedAgent(pub crate::auth::AuthResult);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedAgent {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = req
            .headers()
            .get_one("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "));
        let token = match token {
            Some(t) => t,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };

        let db = match req.rocket().state::<Db>() {
            Some(db) => db,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        let authenticator = match req.rocket().state::<Authenticator>() {
            Some(a) => a,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };

        match authenticator.authenticate(db, token) {
            Ok(result) => Outcome::Success(AuthenticatedAgent(result)),
            Err(crate::auth::AuthError::MissingKey) => Outcome::Error((Status::Unauthorized, ())),
            Err(_) => Outcome::Error((Status::Forbidden, ())),
        }
    }
}

/// `Content-Length` enforcement ahead of body parsing (§4.8, §7.4). Only
/// fails closed when the header is present and over the configured
/// `maxBodySize`; Rocket's own `limits.json` figment setting is the
/// second line of defense against an absent/lying header.
pub struct BodySizeChecked;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BodySizeChecked {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let max = match req.rocket().state::<crate::config::BridgeConfig>() {
            Some(c) => c.max_body_size,
            None => return Outcome::Success(BodySizeChecked),
        };
        let too_big = req
            .headers()
            .get_one("Content-Length")
            .and_then(|v| v.parse::<u64>().ok())
            .is_some_and(|len| len > max);
        if too_big {
            Outcome::Error((Status::PayloadTooLarge, ()))
        } else {
            Outcome::Success(BodySizeChecked)
        }
    }
}

#[rocket::catch(429)]
pub fn too_many_requests() -> rocket::serde::json::Json<serde_json::Value> {
    rocket::serde::json::Json(serde_json::json!({ "error": "Rate limit exceeded" }))
}

#[rocket::catch(404)]
pub fn not_found() -> rocket::serde::json::Json<serde_json::Value> {
    rocket::serde::json::Json(serde_json::json!({ "error": "Not found" }))
}
