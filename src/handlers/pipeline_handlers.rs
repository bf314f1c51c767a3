//! Trigger endpoints for the router and the promoter.

use crate::{
    errors::AppError,
    models::event::NotificationBatch,
    services::{
        promoter_service::PromotionReport,
        router_service::{BatchReport, settle},
    },
    state::AppState,
};
use axum::{Json, body::Bytes, extract::State};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `POST /events`: route one batch of object-creation notifications.
///
/// Responds only after every object settled: 200 with the batch report when
/// all were moved or skipped, 500 naming the failed keys otherwise.
pub async fn route_events(
    State(state): State<AppState>,
    Json(batch): Json<NotificationBatch>,
) -> Result<Json<BatchReport>, AppError> {
    let objects = batch.object_refs();
    tracing::debug!("routing notification batch of {} objects", objects.len());
    let report = settle(state.router.route_batch(objects).await)?;
    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct PromoteRequest {
    /// Overrides the wall clock the trailing window is computed from.
    pub at: Option<DateTime<Utc>>,
}

/// `POST /promotions`: run one promotion now. An empty body uses the
/// current time.
pub async fn promote(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PromotionReport>, AppError> {
    let request = if body.is_empty() {
        PromoteRequest::default()
    } else {
        serde_json::from_slice::<PromoteRequest>(&body)
            .map_err(|e| AppError::bad_request(format!("invalid promotion request: {}", e)))?
    };

    let report = match request.at {
        Some(at) => state.promoter.promote_at(at).await?,
        None => state.promoter.promote().await?,
    };
    Ok(Json(report))
}
