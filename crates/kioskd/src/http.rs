//! HTTP API surface.
//!
//! JSON request/response shapes follow the clinic frontend's existing
//! contract: register and recognize take multipart uploads with the frame
//! burst under `files[]` (or `frames[]`), queue and patient maintenance
//! take JSON bodies. Privileged routes require a bearer token when one is
//! configured.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::admin::{AdminOps, DeleteOutcome, UpdateOutcome};
use crate::config::Config;
use crate::engine::Engine;
use crate::enroll::{EnrollError, EnrollmentCoordinator};
use crate::error::ApiError;
use crate::recognize::{RecognitionCoordinator, RecognizeOutcome};
use kiosk_store::{age_display, PatientDb, PatientFields, PatientRecord};

/// Camera bursts of a dozen JPEG frames fit comfortably under this.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub patients: PatientDb,
    pub engine: Arc<Engine>,
    pub enroll: Arc<EnrollmentCoordinator>,
    pub recognize: Arc<RecognitionCoordinator>,
    pub admin: Arc<AdminOps>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/engine/status", get(engine_status))
        .route("/api/patients", get(list_patients))
        .route(
            "/api/patient/:nik",
            get(patient_detail).delete(delete_patient),
        )
        .route("/api/patient/update", post(update_patient))
        .route("/api/register", post(register))
        .route("/api/recognize", post(recognize))
        .route("/api/check_face", post(check_face))
        .route("/api/queue", get(list_queues))
        .route("/api/queue/assign", post(queue_assign))
        .route("/api/queue/set", post(queue_set))
        .route("/api/reload", post(reload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Gate for privileged routes. Token digests are compared instead of the
/// raw strings. With no token configured the gate is open (development
/// mode; a warning is logged at startup).
fn require_admin(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &config.admin_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// A parsed multipart upload: text fields plus the ordered frame burst.
struct UploadForm {
    texts: HashMap<String, String>,
    frames: Vec<Vec<u8>>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut texts = HashMap::new();
        let mut frames = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "files[]" | "frames[]" | "frame" => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::Validation(format!("frame upload failed: {e}")))?;
                    frames.push(bytes.to_vec());
                }
                _ => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| ApiError::Validation(format!("bad form field: {e}")))?;
                    texts.insert(name, value.trim().to_string());
                }
            }
        }
        Ok(Self { texts, frames })
    }

    /// First non-empty value among the given field names (the frontend has
    /// shipped both Indonesian and English field names over time).
    fn text(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|n| self.texts.get(*n))
            .find(|v| !v.is_empty())
            .cloned()
    }
}

fn patient_json(p: &PatientRecord) -> Value {
    json!({
        "nik": p.nik,
        "name": p.name,
        "dob": p.dob,
        "address": p.address,
        "created_at": p.created_at,
        "age": age_display(&p.dob),
    })
}

async fn engine_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let status = state.engine.status().await?;
    Ok(Json(json!({ "ok": true, "status": status })))
}

async fn list_patients(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let patients = state.patients.list().await?;
    let patients: Vec<Value> = patients.iter().map(patient_json).collect();
    Ok(Json(json!({ "ok": true, "patients": patients })))
}

async fn patient_detail(
    State(state): State<AppState>,
    Path(nik): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    match state.patients.get(nik).await? {
        Some(p) => Ok(Json(json!({ "ok": true, "patient": patient_json(&p) }))),
        None => Err(ApiError::NotFound(format!("patient {nik} not registered"))),
    }
}

async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = UploadForm::read(multipart).await?;

    let nik_str = form.text(&["nik"]);
    let name = form.text(&["name", "nama"]);
    let dob = form.text(&["dob", "ttl"]);
    let address = form.text(&["address", "alamat"]);
    let (Some(nik_str), Some(name), Some(dob), Some(address)) = (nik_str, name, dob, address)
    else {
        return Err(ApiError::Validation(
            "all identity fields are required".to_string(),
        ));
    };
    let nik: i64 = nik_str
        .parse()
        .map_err(|_| ApiError::Validation("nik must be numeric".to_string()))?;
    if form.frames.is_empty() {
        return Err(ApiError::Validation("no frames uploaded".to_string()));
    }

    let fields = PatientFields { name, dob, address };
    match state.enroll.enroll(nik, fields, &form.frames).await {
        Ok(outcome) => Ok(Json(json!({
            "ok": true,
            "msg": outcome.message,
            "persisted": outcome.persisted,
            "skipped": outcome.skipped.len(),
            "below_target": outcome.below_target,
        }))),
        Err(err @ (EnrollError::NoUsableFrames | EnrollError::NoEmbeddings)) => {
            Err(ApiError::Validation(err.to_string()))
        }
        Err(EnrollError::Engine(err)) => Err(err.into()),
        Err(EnrollError::Store(err)) => Err(err.into()),
    }
}

async fn recognize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = UploadForm::read(multipart).await?;
    if form.frames.is_empty() {
        return Err(ApiError::Validation("no frames uploaded".to_string()));
    }
    let fast_mode = form
        .text(&["fast_mode"])
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    match state.recognize.recognize(&form.frames, fast_mode).await? {
        RecognizeOutcome::Recognized {
            patient,
            age,
            similarity,
            confidence,
        } => Ok(Json(json!({
            "ok": true,
            "found": true,
            "nik": patient.nik,
            "name": patient.name,
            "dob": patient.dob,
            "address": patient.address,
            "age": age,
            "confidence": confidence,
            "similarity": similarity,
        }))),
        RecognizeOutcome::UnknownPatient {
            identity,
            similarity,
        } => {
            tracing::debug!(identity, similarity, "match without patient record");
            Ok(Json(json!({
                "ok": true,
                "found": false,
                "msg": "face recognized but no matching patient record",
                "similarity": similarity,
            })))
        }
        RecognizeOutcome::NoMatch => Ok(Json(json!({
            "ok": true,
            "found": false,
            "msg": "face not recognized",
        }))),
        RecognizeOutcome::NoUsableFrames { skipped } => Ok(Json(json!({
            "ok": true,
            "found": false,
            "msg": "no valid frames",
            "skipped": skipped.len(),
        }))),
    }
}

async fn check_face(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let Some(bytes) = form.frames.first() else {
        return Ok(Json(json!({ "ok": false, "found": false })));
    };
    let Ok(image) = image::load_from_memory(bytes) else {
        return Ok(Json(json!({ "ok": false, "found": false })));
    };
    let found = state.engine.detect_any_face_fast(&image)?;
    Ok(Json(json!({ "ok": true, "found": found })))
}

#[derive(Deserialize)]
struct QueueAssignBody {
    #[serde(alias = "poli")]
    department: String,
}

async fn queue_assign(
    State(state): State<AppState>,
    Json(body): Json<QueueAssignBody>,
) -> Result<Json<Value>, ApiError> {
    let department = body.department.trim().to_string();
    match state.patients.allocate_next(department.clone()).await? {
        Some(number) => Ok(Json(json!({
            "ok": true,
            "department": department,
            "number": number,
        }))),
        None => Err(ApiError::Validation(format!(
            "unknown department: {department}"
        ))),
    }
}

#[derive(Deserialize)]
struct QueueSetBody {
    #[serde(alias = "poli")]
    department: String,
    #[serde(alias = "nomor")]
    number: i64,
}

async fn queue_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<QueueSetBody>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state.config, &headers)?;
    if body.number < 0 {
        return Err(ApiError::Validation(
            "queue number must be non-negative".to_string(),
        ));
    }
    let department = body.department.trim().to_string();
    if !state
        .patients
        .set_queue(department.clone(), body.number)
        .await?
    {
        return Err(ApiError::Validation(format!(
            "unknown department: {department}"
        )));
    }
    Ok(Json(json!({
        "ok": true,
        "msg": format!("{department} counter set to {}", body.number),
    })))
}

async fn list_queues(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let queues = state.patients.list_queues().await?;
    Ok(Json(json!({ "ok": true, "queues": queues })))
}

#[derive(Deserialize)]
struct UpdatePatientBody {
    old_nik: String,
    nik: String,
    name: Option<String>,
    dob: String,
    address: String,
}

async fn update_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UpdatePatientBody>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state.config, &headers)?;
    if body.dob.trim().is_empty() || body.address.trim().is_empty() {
        return Err(ApiError::Validation(
            "dob and address are required".to_string(),
        ));
    }
    let old_nik: i64 = body
        .old_nik
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation("nik must be numeric".to_string()))?;
    let new_nik: i64 = body
        .nik
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation("nik must be numeric".to_string()))?;

    match state
        .admin
        .update_patient(
            old_nik,
            new_nik,
            body.name,
            body.dob.trim().to_string(),
            body.address.trim().to_string(),
        )
        .await?
    {
        UpdateOutcome::NotFound => {
            Err(ApiError::NotFound(format!("patient {old_nik} not registered")))
        }
        UpdateOutcome::Conflict => Err(ApiError::Conflict(format!(
            "nik {new_nik} already belongs to another patient"
        ))),
        UpdateOutcome::Updated {
            embeddings_updated,
            renamed,
            partial,
        } => {
            let msg = match (renamed, partial) {
                (true, true) => "record updated but embedding re-tag failed".to_string(),
                (true, false) => {
                    format!("record updated, {embeddings_updated} embedding(s) re-tagged")
                }
                _ => "record updated, identifier unchanged".to_string(),
            };
            Ok(Json(json!({
                "ok": true,
                "partial": partial,
                "embeddings_updated": embeddings_updated,
                "msg": msg,
            })))
        }
    }
}

async fn delete_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(nik): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state.config, &headers)?;
    match state.admin.delete_patient(nik).await? {
        DeleteOutcome::NotFound => Err(ApiError::NotFound(format!("patient {nik} not registered"))),
        DeleteOutcome::Deleted {
            embeddings_removed,
            partial,
        } => Ok(Json(json!({
            "ok": true,
            "partial": partial,
            "embeddings_removed": embeddings_removed,
        }))),
    }
}

async fn reload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state.config, &headers)?;
    let gallery_size = state.admin.reload().await?;
    Ok(Json(json!({ "ok": true, "gallery_size": gallery_size })))
}
