//! HTTP request handlers
//!
//! The thin translation layer between HTTP and the repository manager:
//! every handler authenticates the caller, maps headers to engine
//! arguments, and lets the `StoreError` -> status mapping shape failures.
//! Object keys may contain `/` and are captured by a tail match.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::BytesMut;
use futures::StreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::{authenticate, require_admin};
use crate::error::StoreError;
use crate::store::repository::{headers as object_headers, KeyPair, Role};

/// Response entity for a newly created repository; the only time the
/// minted secret is ever handed out.
#[derive(Debug, Serialize)]
pub struct RepositoryCreated {
    pub id: Uuid,
    pub key_pair: KeyPair,
}

/// Response entity for an object listing.
#[derive(Debug, Serialize)]
pub struct ObjectList {
    pub objects: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "startsWith", default)]
    pub starts_with: Option<String>,
}

/// Register all routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/repository")
            .route(web::post().to(create_repository))
            .route(web::get().to(list_objects)),
    )
    .service(web::resource("/repository/{id}").route(web::delete().to(delete_repository)))
    .service(
        web::resource("/object/{key:.*}")
            .route(web::put().to(put_object))
            .route(web::get().to(get_object))
            .route(web::head().to(head_object))
            .route(web::delete().to(delete_object)),
    );
}

/// POST /repository: mint a fresh tenant (admin only).
async fn create_repository(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let tenant = authenticate(&state.manager, &req)?;
    require_admin(&tenant)?;

    let id = Uuid::new_v4();
    let key_pair = KeyPair::generate(id, vec![Role::User]);
    state.manager.create_repository(id, key_pair.clone())?;
    debug!("Tenant {} created repository {}", tenant.id(), id);

    Ok(HttpResponse::Created().json(RepositoryCreated { id, key_pair }))
}

/// DELETE /repository/{id}: destroy a tenant (admin only). The bootstrap
/// admin repository itself is never deletable.
async fn delete_repository(
    path: web::Path<String>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let tenant = authenticate(&state.manager, &req)?;
    require_admin(&tenant)?;

    let id: Uuid = path
        .into_inner()
        .parse()
        .map_err(|_| StoreError::RepositoryNotFound { id: Uuid::nil() })?;
    if state.admin_id() == Some(id) {
        warn!("Tenant {} attempted to delete the admin repository", tenant.id());
        return Err(StoreError::Forbidden);
    }

    state.manager.delete_repository(id)?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /repository?startsWith=  lists the caller's own object keys.
async fn list_objects(
    query: web::Query<ListQuery>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let tenant = authenticate(&state.manager, &req)?;
    let repo = state.manager.get_repository(tenant.id(), true)?;
    let prefix = query.starts_with.as_deref().unwrap_or("");
    let objects = state.manager.list_objects(&repo, prefix)?;
    let count = objects.len();
    Ok(HttpResponse::Ok().json(ObjectList { objects, count }))
}

/// PUT /object/{key}: upload content. Content-Length is mandatory, the
/// configured maximum size is enforced, and If-Match is honored against
/// the current ETag.
async fn put_object(
    path: web::Path<String>,
    mut payload: web::Payload,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let tenant = authenticate(&state.manager, &req)?;
    let repo = state.manager.get_repository(tenant.id(), true)?;
    let key = path.into_inner();

    let max = state.config.server.max_upload_bytes;
    let declared: u64 = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(StoreError::LengthRequired)?;
    if declared > max {
        return Err(StoreError::TooLarge { max });
    }

    let mut content = BytesMut::with_capacity(declared as usize);
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Error reading payload chunk for {}: {}", key, e);
            StoreError::ObjectFlush {
                key: key.clone(),
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e.to_string()),
            }
        })?;
        if content.len() + chunk.len() > max as usize {
            return Err(StoreError::TooLarge { max });
        }
        content.extend_from_slice(&chunk);
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let if_match = if_match_header(&req);

    let etag = state.manager.put_object(
        &repo,
        &key,
        &content,
        content_type,
        if_match.as_deref(),
    )?;
    Ok(HttpResponse::Ok()
        .insert_header((header::ETAG, format!("\"{}\"", etag)))
        .finish())
}

/// GET /object/{key}: fetch content plus stored headers.
async fn get_object(
    path: web::Path<String>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let tenant = authenticate(&state.manager, &req)?;
    let repo = state.manager.get_repository(tenant.id(), true)?;
    let key = path.into_inner();

    let (content, headers_map) = state.manager.get_object(&repo, &key)?;
    let mut builder = object_response(&headers_map);
    Ok(builder.body(content))
}

/// HEAD /object/{key}: stored headers only.
async fn head_object(
    path: web::Path<String>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let tenant = authenticate(&state.manager, &req)?;
    let repo = state.manager.get_repository(tenant.id(), true)?;
    let key = path.into_inner();

    let headers_map = state.manager.get_object_headers(&repo, &key)?;
    let mut builder = object_response(&headers_map);
    if let Some(length) = first_header(&headers_map, object_headers::CONTENT_LENGTH) {
        builder.insert_header((header::CONTENT_LENGTH, length));
    }
    Ok(builder.finish())
}

/// DELETE /object/{key}: remove an object, honoring If-Match.
async fn delete_object(
    path: web::Path<String>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let tenant = authenticate(&state.manager, &req)?;
    let repo = state.manager.get_repository(tenant.id(), true)?;
    let key = path.into_inner();

    let if_match = if_match_header(&req);
    state
        .manager
        .delete_hashed_file_object(&repo, &key, if_match.as_deref())?;
    Ok(HttpResponse::NoContent().finish())
}

/// If-Match value with any surrounding ETag quotes stripped.
fn if_match_header(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"').to_string())
}

fn first_header(map: &BTreeMap<String, Vec<String>>, name: &str) -> Option<String> {
    map.get(name).and_then(|values| values.first().cloned())
}

/// Response builder carrying an object's stored headers. The ETag goes out
/// quoted per HTTP convention; the stored value stays bare.
fn object_response(headers_map: &BTreeMap<String, Vec<String>>) -> actix_web::HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    if let Some(content_type) = first_header(headers_map, object_headers::CONTENT_TYPE) {
        builder.content_type(content_type);
    }
    if let Some(etag) = first_header(headers_map, object_headers::ETAG) {
        builder.insert_header((header::ETAG, format!("\"{}\"", etag)));
    }
    if let Some(modified) = first_header(headers_map, object_headers::LAST_MODIFIED) {
        builder.insert_header((header::LAST_MODIFIED, modified));
    }
    builder
}
