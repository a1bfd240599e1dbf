//! Management endpoints (spec §4.10): route table introspection, counter
//! reset, and hot-adding a new route + artifact.

use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Responder};
use satellite_core::route::RouteDoc;
use satellite_core::{HitCounter, RouteTable};
use serde::{Deserialize, Serialize};

pub struct ManagementState {
    pub table: Arc<RouteTable>,
    pub counter: Arc<HitCounter>,
}

#[derive(Serialize)]
struct RouteSummary {
    pattern: String,
    content_type: Option<String>,
}

#[get("/")]
pub async fn list_routes(state: web::Data<ManagementState>) -> impl Responder {
    let snapshot = state.table.current();
    let routes: Vec<RouteSummary> = snapshot
        .routes
        .iter()
        .map(|r| RouteSummary {
            pattern: r.pattern.clone(),
            content_type: r.content_type.clone(),
        })
        .collect();
    HttpResponse::Ok().json(routes)
}

#[derive(Deserialize)]
pub struct ResetRequest {
    path: String,
}

#[post("/reset")]
pub async fn reset_counter(state: web::Data<ManagementState>, body: web::Json<ResetRequest>) -> impl Responder {
    match state.counter.reset(&body.path) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({"path": body.path})),
        Err(e) => {
            log::error!("failed to reset counter for {:?}: {e}", body.path);
            HttpResponse::InternalServerError().json(serde_json::json!({"error": e.to_string()}))
        }
    }
}

#[derive(Deserialize)]
pub struct NewRouteRequest {
    path: RouteDoc,
    file: String,
}

/// Writes the base64-decoded artifact beneath the server root, appends the
/// route to the manifest, and triggers a reload. A malformed route or bad
/// base64 payload is rejected before anything touches disk.
#[post("/new")]
pub async fn new_route(state: web::Data<ManagementState>, body: web::Json<NewRouteRequest>) -> impl Responder {
    let decoded = match base64::decode(&body.file) {
        Ok(bytes) => bytes,
        Err(e) => return HttpResponse::BadRequest().json(serde_json::json!({"error": e.to_string()})),
    };

    let hosted_file = match &body.path.hosted_file {
        Some(f) => f.clone(),
        None => {
            return HttpResponse::BadRequest()
                .json(serde_json::json!({"error": "new routes must set hosted_file"}))
        }
    };

    let artifact_path = state.table.root().join(hosted_file.trim_start_matches('/'));
    if let Some(parent) = artifact_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return HttpResponse::InternalServerError().json(serde_json::json!({"error": e.to_string()}));
        }
    }
    if let Err(e) = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o644)
        .open(&artifact_path)
        .and_then(|mut f| std::io::Write::write_all(&mut f, &decoded))
    {
        return HttpResponse::InternalServerError().json(serde_json::json!({"error": e.to_string()}));
    }

    match append_to_manifest(&state.table, &body.path) {
        Ok(()) => {}
        Err(e) => return HttpResponse::InternalServerError().json(serde_json::json!({"error": e})),
    }

    match state.table.reload() {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({"path": body.path.path})),
        Err(e) => HttpResponse::InternalServerError().json(serde_json::json!({"error": e.to_string()})),
    }
}

fn append_to_manifest(table: &RouteTable, new_route: &RouteDoc) -> Result<(), String> {
    let manifest_path = table.root().join("pathList.yml");
    let mut docs: Vec<RouteDoc> = if manifest_path.is_file() {
        let raw = std::fs::read_to_string(&manifest_path).map_err(|e| e.to_string())?;
        serde_yaml::from_str(&raw).map_err(|e| e.to_string())?
    } else {
        Vec::new()
    };
    docs.push(new_route.clone());
    let raw = serde_yaml::to_string(&docs).map_err(|e| e.to_string())?;
    std::fs::write(&manifest_path, raw).map_err(|e| e.to_string())
}
