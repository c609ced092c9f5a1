//! HTTP surface over the broker service.
//!
//! Thin marshalling layer: requirements in, view models out, the error
//! taxonomy mapped onto statuses. Everything interesting happens in
//! [`BrokerService`].

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use drover::error::DroverError;
use drover::model::{Requirements, SessionView, decode_bool};
use drover::service::BrokerService;

pub type SharedService = Arc<BrokerService>;

/// Builds the session API router.
pub fn build_router(service: SharedService) -> Router {
	Router::new()
		.route("/sessions/", get(list_sessions).post(create_session))
		.route("/sessions/refresh", post(refresh_all))
		.route(
			"/sessions/{id}",
			get(get_session).put(update_session).delete(delete_session),
		)
		.route("/sessions/{id}/refresh", post(refresh_one))
		.with_state(service)
}

/// Error envelope: the taxonomy mapped to HTTP statuses, message in a JSON
/// `error` field.
pub struct ApiError(DroverError);

impl From<DroverError> for ApiError {
	fn from(err: DroverError) -> Self {
		Self(err)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = match &self.0 {
			DroverError::NotFound(_) => StatusCode::NOT_FOUND,
			DroverError::AlreadyReserved(_) => StatusCode::CONFLICT,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		};
		if status == StatusCode::INTERNAL_SERVER_ERROR {
			warn!(target = "drover.http", error = %self.0, "request failed");
		}
		(status, Json(json!({ "error": self.0.to_string() }))).into_response()
	}
}

#[derive(Debug, Default, Deserialize)]
struct CreateQuery {
	force_create: Option<String>,
	reserve: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateBody {
	tags: Option<BTreeSet<String>>,
	reserved: Option<bool>,
}

/// String-boolean query flag; absent means false.
fn flag(field: &'static str, raw: Option<&str>) -> Result<bool, ApiError> {
	match raw {
		Some(raw) => Ok(decode_bool(field, raw)?),
		None => Ok(false),
	}
}

async fn list_sessions(State(service): State<SharedService>) -> Result<Json<Vec<SessionView>>, ApiError> {
	Ok(Json(service.list().await?))
}

async fn create_session(
	State(service): State<SharedService>,
	Query(query): Query<CreateQuery>,
	body: Option<Json<Requirements>>,
) -> Result<Json<SessionView>, ApiError> {
	let req = body.map(|Json(req)| req).unwrap_or_default();
	let force_create = flag("force_create", query.force_create.as_deref())?;
	let reserve = flag("reserve", query.reserve.as_deref())?;
	let view = service.get_or_create(&req, force_create, reserve).await?;
	Ok(Json(view))
}

async fn get_session(
	State(service): State<SharedService>,
	Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
	match service.get(&id).await? {
		Some(view) => Ok(Json(view)),
		None => Err(DroverError::NotFound(id).into()),
	}
}

async fn update_session(
	State(service): State<SharedService>,
	Path(id): Path<String>,
	body: Option<Json<UpdateBody>>,
) -> Result<Json<SessionView>, ApiError> {
	let body = body.map(|Json(body)| body).unwrap_or_default();
	let view = service.update(&id, body.tags.as_ref(), body.reserved).await?;
	Ok(Json(view))
}

async fn delete_session(
	State(service): State<SharedService>,
	Path(id): Path<String>,
) -> Result<Json<bool>, ApiError> {
	Ok(Json(service.destroy(&id).await?))
}

async fn refresh_all(State(service): State<SharedService>) -> Json<bool> {
	service.refresh_all().await;
	Json(true)
}

async fn refresh_one(
	State(service): State<SharedService>,
	Path(id): Path<String>,
) -> Result<Json<bool>, ApiError> {
	Ok(Json(service.refresh_one(&id).await?))
}
