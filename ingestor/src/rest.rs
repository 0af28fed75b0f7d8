use crate::db::Storage;
use crate::errors::ReadError;
use crate::model::{LatestResponse, SeriesPoint, SeriesResponse, StatsResponse};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
const DEFAULT_DAYS: u32 = 1;

#[derive(Clone)]
struct AppState {
    storage: Arc<Storage>,
    update_interval_ms: u64,
    debug: bool,
}

impl AppState {
    /// Read failures never reach the client as an HTTP error; the detail is
    /// only echoed back in debug mode.
    fn degrade(&self, what: &str, err: ReadError) -> Option<String> {
        error!("Dashboard query for {} failed: {}", what, err);
        self.debug.then(|| err.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    /// Kept as text so an unparsable value falls back to the default window
    /// instead of rejecting the request.
    days: Option<String>,
}

/// Read-only API polled by the dashboard.
pub fn create_router(storage: Arc<Storage>, update_interval_ms: u64, debug: bool) -> Router {
    let state = AppState {
        storage,
        update_interval_ms,
        debug,
    };

    Router::new()
        .route("/api/v1/latest", get(get_latest))
        .route("/api/v1/series", get(get_series))
        .route("/api/v1/stats", get(get_stats))
        .with_state(state)
}

async fn get_latest(State(state): State<AppState>) -> Json<LatestResponse> {
    let (sample, error) = match state.storage.get_latest().await {
        Ok(sample) => (sample, None),
        Err(e) => (None, state.degrade("latest sample", e)),
    };

    Json(LatestResponse {
        sample,
        update_interval_ms: state.update_interval_ms,
        error,
    })
}

async fn get_series(
    State(state): State<AppState>,
    Query(params): Query<SeriesQuery>,
) -> Json<SeriesResponse> {
    let days = window_days(params.days.as_deref());
    debug!("Series requested for the last {} day(s)", days);

    let (data, error) = match state.storage.get_samples_since(window_ms(days)).await {
        Ok(rows) => (rows.iter().map(SeriesPoint::from).collect::<Vec<_>>(), None),
        Err(e) => (Vec::new(), state.degrade("series", e)),
    };

    Json(SeriesResponse {
        days,
        total: data.len(),
        data,
        error,
    })
}

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    match state.storage.get_stats().await {
        Ok(Some(stats)) => Json(StatsResponse {
            count: stats.count,
            latest: Some(stats.latest),
            earliest: Some(stats.earliest),
            error: None,
        }),
        Ok(None) => Json(StatsResponse {
            count: 0,
            latest: None,
            earliest: None,
            error: None,
        }),
        Err(e) => Json(StatsResponse {
            count: 0,
            latest: None,
            earliest: None,
            error: state.degrade("stats", e),
        }),
    }
}

fn window_days(requested: Option<&str>) -> u32 {
    match requested.and_then(|raw| raw.trim().parse::<u32>().ok()) {
        Some(0) | None => DEFAULT_DAYS,
        Some(days) => days,
    }
}

fn window_ms(days: u32) -> i64 {
    i64::from(days) * MS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_days() {
        assert_eq!(window_days(None), 1);
        assert_eq!(window_days(Some("0")), 1);
        assert_eq!(window_days(Some("7")), 7);
        assert_eq!(window_days(Some(" 30 ")), 30);
        assert_eq!(window_days(Some("abc")), 1);
        assert_eq!(window_days(Some("-3")), 1);
        assert_eq!(window_days(Some("")), 1);
    }

    #[test]
    fn test_unparsable_days_is_not_rejected() {
        let uri: axum::http::Uri = "/api/v1/series?days=abc".parse().unwrap();
        let Query(params) = Query::<SeriesQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(window_days(params.days.as_deref()), DEFAULT_DAYS);

        let uri: axum::http::Uri = "/api/v1/series?days=7".parse().unwrap();
        let Query(params) = Query::<SeriesQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(window_days(params.days.as_deref()), 7);
    }

    #[test]
    fn test_window_ms() {
        assert_eq!(window_ms(1), 86_400_000);
        assert_eq!(window_ms(30), 2_592_000_000);
        // no overflow at the top of the range
        assert_eq!(window_ms(u32::MAX), i64::from(u32::MAX) * 86_400_000);
    }
}
