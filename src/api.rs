use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::channel::PushChannel;
use crate::config::Thresholds;
use crate::error::MonitorError;
use crate::models::{
    AlertEvent, AlertState, Classification, Contact, ContactUpdate, NewContact, Patient, Reading,
    Trend,
};
use crate::monitor::Monitor;

/// Widest history window a client may ask for.
const MAX_HISTORY_HOURS: i64 = 24 * 90;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Monitor(err) => match err {
                MonitorError::UnknownPatient(_) => (StatusCode::NOT_FOUND, "UNKNOWN_PATIENT"),
                MonitorError::UnknownContact(_) => (StatusCode::NOT_FOUND, "UNKNOWN_CONTACT"),
                MonitorError::UnknownAlert(_) => (StatusCode::NOT_FOUND, "UNKNOWN_ALERT"),
                MonitorError::DuplicatePatient(_) => (StatusCode::CONFLICT, "DUPLICATE_PATIENT"),
                MonitorError::LastFullContactRemoval(_) => {
                    (StatusCode::CONFLICT, "LAST_FULL_CONTACT")
                }
                MonitorError::MissingFullContact => {
                    (StatusCode::BAD_REQUEST, "MISSING_FULL_CONTACT")
                }
                MonitorError::AlreadyResolved(_) => (StatusCode::CONFLICT, "ALREADY_RESOLVED"),
                MonitorError::InvalidReading(_) => (StatusCode::BAD_REQUEST, "INVALID_READING"),
                MonitorError::NotSubscribed { .. } => (StatusCode::FORBIDDEN, "NOT_SUBSCRIBED"),
            },
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub push: Arc<PushChannel>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/patients", get(list_patients).post(register_patient))
        .route("/patients/:id", get(patient))
        .route("/patients/:id/readings", get(readings))
        .route("/patients/:id/alerts", get(patient_alerts))
        .route("/patients/:id/sos", post(sos))
        .route("/patients/:id/contacts", get(contacts).post(add_contact))
        .route("/contacts/:id", put(update_contact).delete(remove_contact))
        .route("/contacts/:id/stream", get(stream))
        .route("/readings", post(ingest))
        .route("/alerts/:id", get(alert))
        .route("/alerts/:id/acknowledge", post(acknowledge))
        .route("/alerts/:id/resolve", post(resolve))
        .route("/settings/thresholds", get(thresholds));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterPatientRequest {
    pub name: String,
    pub primary_contact: NewContact,
}

#[derive(Debug, Serialize)]
pub struct RegisteredPatient {
    pub patient: Patient,
    pub contact: Contact,
}

async fn register_patient(
    State(state): State<AppState>,
    Json(request): Json<RegisterPatientRequest>,
) -> Result<(StatusCode, Json<RegisteredPatient>), ApiError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("patient name is required".into()));
    }
    let (patient, contact) = state
        .monitor
        .register_patient(name, request.primary_contact)
        .await?;
    Ok((StatusCode::CREATED, Json(RegisteredPatient { patient, contact })))
}

async fn list_patients(State(state): State<AppState>) -> Json<Vec<Patient>> {
    Json(state.monitor.patients().await)
}

async fn patient(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Patient>, ApiError> {
    Ok(Json(state.monitor.patient(patient_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub hours: Option<i64>,
}

async fn readings(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let hours = query.hours.unwrap_or(24);
    if !(1..=MAX_HISTORY_HOURS).contains(&hours) {
        return Err(ApiError::BadRequest(format!(
            "hours must be between 1 and {MAX_HISTORY_HOURS}"
        )));
    }
    let history = state
        .monitor
        .history(patient_id, chrono::Duration::hours(hours))
        .await?;
    Ok(Json(history))
}

async fn patient_alerts(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<AlertEvent>>, ApiError> {
    Ok(Json(state.monitor.alerts_for(patient_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ReadingRequest {
    pub patient_id: Uuid,
    pub value: f64,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReadingResponse {
    pub classification: Classification,
    pub trend: Trend,
    pub changed: bool,
    pub patient: Patient,
}

async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<ReadingRequest>,
) -> Result<Json<ReadingResponse>, ApiError> {
    let reading = Reading {
        patient_id: request.patient_id,
        value: request.value,
        captured_at: request.captured_at.unwrap_or_else(Utc::now),
    };
    let outcome = state.monitor.ingest(reading).await?;
    Ok(Json(ReadingResponse {
        classification: outcome.evaluation.classification,
        trend: outcome.evaluation.trend,
        changed: outcome.changed,
        patient: outcome.patient,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SosRequest {
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SosResponse {
    pub alert_id: Uuid,
    pub state: AlertState,
}

async fn sos(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    request: Option<Json<SosRequest>>,
) -> Result<Json<SosResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let alert = state
        .monitor
        .trigger_sos(patient_id, request.description)
        .await?;
    Ok(Json(SosResponse {
        alert_id: alert.id,
        state: alert.state,
    }))
}

async fn alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<AlertEvent>, ApiError> {
    Ok(Json(state.monitor.alert(alert_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub contact_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub contact_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AlertStateResponse {
    pub alert_id: Uuid,
    pub state: AlertState,
}

async fn acknowledge(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<AlertStateResponse>, ApiError> {
    let alert = state
        .monitor
        .acknowledge(alert_id, request.contact_id)
        .await?;
    Ok(Json(AlertStateResponse {
        alert_id,
        state: alert.state,
    }))
}

async fn resolve(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<AlertStateResponse>, ApiError> {
    let alert = state.monitor.resolve(alert_id, request.contact_id).await?;
    Ok(Json(AlertStateResponse {
        alert_id,
        state: alert.state,
    }))
}

async fn contacts(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    Ok(Json(state.monitor.contacts_for(patient_id).await?))
}

async fn add_contact(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<NewContact>,
) -> Result<(StatusCode, Json<Contact>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("contact name is required".into()));
    }
    let contact = state.monitor.add_contact(patient_id, request).await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn update_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
    Json(update): Json<ContactUpdate>,
) -> Result<Json<Contact>, ApiError> {
    Ok(Json(state.monitor.update_contact(contact_id, update).await?))
}

async fn remove_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.monitor.remove_contact(contact_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/contacts/:id/stream`: server-sent events for every alert
/// delivered to the contact.
async fn stream(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.monitor.contact(contact_id).await?;
    let receiver = state.push.subscribe(contact_id).await;

    let events = futures_util::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(alert) => {
                    let event = Event::default()
                        .event("alert")
                        .json_data(&alert)
                        .unwrap_or_else(|_| Event::default().event("alert").data(alert.id.to_string()));
                    return Some((Ok(event), receiver));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Alert stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
pub struct ThresholdSettings {
    pub thresholds: Thresholds,
    pub resolve_cooldown_secs: i64,
}

async fn thresholds(State(state): State<AppState>) -> Json<ThresholdSettings> {
    let config = state.monitor.config();
    Json(ThresholdSettings {
        thresholds: config.thresholds.clone(),
        resolve_cooldown_secs: config.resolve_cooldown_secs,
    })
}
