//! The HTTP/JSON gateway (§6): the one concrete transport this build
//! serves over the `ObjectService` facade, using `axum` the way the
//! teacher crate already depends on it.

use std::{io::Read, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{errors::StoreError, facade::ObjectService, model::Manifest};

/// Mirrors §6's numeric response status enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    UnknownInvalid = 0,
    Ok = 1,
    Failed = 2,
    NotFound = 3,
}

#[derive(Serialize)]
struct HeadResponse {
    status: ResponseStatus,
    message: String,
    object: Option<crate::model::Object>,
}

#[derive(Deserialize)]
struct GetQuery {
    #[serde(default)]
    name: String,
    #[serde(default)]
    with_meta: bool,
}

#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    names: String,
}

#[derive(Deserialize)]
struct UploadQuery {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    overwrite: bool,
    #[serde(default)]
    tags: String,
}

pub fn router(service: Arc<dyn ObjectService>) -> Router {
    Router::new()
        .route("/head/{id}", get(head))
        .route("/object/{id}", get(get_object))
        .route("/object/{group}", post(upload))
        .route("/object/{id}", delete(delete_object))
        .route("/refresh/{id}", put(refresh))
        .route("/manifest/{group}", get(get_manifest))
        .route("/manifest/{group}", put(set_manifest))
        .with_state(service)
}

fn status_for_error(err: &StoreError) -> (StatusCode, ResponseStatus) {
    match err {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, ResponseStatus::NotFound),
        StoreError::InvalidId(_) | StoreError::InvalidPath(_) | StoreError::UnsupportedContentType(_) => {
            (StatusCode::BAD_REQUEST, ResponseStatus::UnknownInvalid)
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, ResponseStatus::Failed),
    }
}

async fn head(State(service): State<Arc<dyn ObjectService>>, Path(id): Path<String>) -> Response {
    match service.head(&id) {
        Ok(object) => axum::Json(HeadResponse {
            status: ResponseStatus::Ok,
            message: String::new(),
            object: Some(object),
        })
        .into_response(),
        Err(e) => {
            let (code, status) = status_for_error(&e);
            (
                code,
                axum::Json(HeadResponse { status, message: e.to_string(), object: None }),
            )
                .into_response()
        }
    }
}

async fn get_object(
    State(service): State<Arc<dyn ObjectService>>,
    Path(id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Response {
    match service.get(&id, &query.name) {
        Ok((object, mut reader)) => {
            let mut body = Vec::new();
            if let Err(e) = reader.read_to_end(&mut body) {
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
            let item = object.meta.item_by_name(&query.name).unwrap_or(&object.meta.main);
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(&item.content_type).unwrap_or(HeaderValue::from_static("application/octet-stream")),
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
            headers.insert(
                "x-content-size",
                HeaderValue::from(body.len() as u64),
            );
            if query.with_meta {
                if let Ok(json) = serde_json::to_vec(item) {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(json);
                    if let Ok(v) = HeaderValue::from_str(&encoded) {
                        headers.insert("x-content-meta", v);
                    }
                }
            }
            if !object.meta.tags.is_empty() {
                if let Ok(v) = HeaderValue::from_str(&object.meta.tags.join(",")) {
                    headers.insert("x-content-tags", v);
                }
            }
            (StatusCode::OK, headers, body).into_response()
        }
        Err(e) => {
            let (code, status) = status_for_error(&e);
            (code, axum::Json(HeadResponse { status, message: e.to_string(), object: None })).into_response()
        }
    }
}

async fn upload(
    State(service): State<Arc<dyn ObjectService>>,
    Path(group): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    let tags: Vec<String> = query.tags.split(',').filter(|t| !t.is_empty()).map(str::to_string).collect();
    let mut reader = body.as_ref();
    match service.upload(&group, query.id.as_deref(), query.overwrite, tags, &mut reader) {
        Ok(object) => axum::Json(HeadResponse { status: ResponseStatus::Ok, message: String::new(), object: Some(object) })
            .into_response(),
        Err(e) => {
            let (code, status) = status_for_error(&e);
            (code, axum::Json(HeadResponse { status, message: e.to_string(), object: None })).into_response()
        }
    }
}

async fn refresh(State(service): State<Arc<dyn ObjectService>>, Path(id): Path<String>) -> Response {
    match service.refresh(&id) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => status_for_error(&e).0.into_response(),
    }
}

async fn delete_object(
    State(service): State<Arc<dyn ObjectService>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    let names: Vec<String> = query.names.split(',').filter(|n| !n.is_empty()).map(str::to_string).collect();
    match service.delete(&id, &names) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => status_for_error(&e).0.into_response(),
    }
}

async fn get_manifest(State(service): State<Arc<dyn ObjectService>>, Path(group): Path<String>) -> Response {
    match service.get_manifest(&group) {
        Ok(manifest) => axum::Json(manifest).into_response(),
        Err(e) => status_for_error(&e).0.into_response(),
    }
}

async fn set_manifest(
    State(service): State<Arc<dyn ObjectService>>,
    Path(group): Path<String>,
    axum::Json(manifest): axum::Json<Manifest>,
) -> Response {
    match service.set_manifest(&group, manifest) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => status_for_error(&e).0.into_response(),
    }
}
