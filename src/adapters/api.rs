use std::collections::BTreeSet;
use std::sync::Arc;

use actix_web::{HttpResponse, Responder, get, post, put, web};
use serde::{Deserialize, Serialize};

use crate::app::services::{
    InsightCommandHandler, InsightQueryHandler, InsightService, PipelineState, ServiceError,
};
use crate::domain::insight::{InsightType, Priority};
use crate::domain::metrics::DerivedMetrics;
use crate::domain::weather::WeatherSnapshot;

#[derive(Clone)]
pub struct ApiState {
    pub insights: Arc<InsightService>,
    pub pipeline: Arc<PipelineState>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatestMetricsResponse {
    pub metrics: DerivedMetrics,
    pub history_depth: usize,
    pub weather: Option<WeatherSnapshot>,
}

/// Allow-sets for the insight list. An empty set means "everything".
#[derive(Debug, Deserialize)]
pub struct FilterUpdate {
    #[serde(default)]
    pub priorities: BTreeSet<Priority>,
    #[serde(default)]
    pub types: BTreeSet<InsightType>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(get_insights_endpoint)
        .service(get_latest_metrics_endpoint)
        .service(dismiss_insight_endpoint)
        .service(get_preferences_endpoint)
        .service(update_filters_endpoint)
        .service(reset_preferences_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/insights")]
async fn get_insights_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.insights.latest_insights() {
        Ok(Some(published)) => HttpResponse::Ok().json(published),
        Ok(None) => HttpResponse::NoContent().finish(),
        Err(error) => service_error_response(error),
    }
}

#[get("/metrics/latest")]
async fn get_latest_metrics_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let snapshot = match state.pipeline.snapshot() {
        Ok(snapshot) => snapshot,
        Err(error) => return service_error_response(error),
    };

    match snapshot.metrics {
        Some(metrics) => HttpResponse::Ok().json(LatestMetricsResponse {
            metrics,
            history_depth: snapshot.history.len(),
            weather: snapshot.weather,
        }),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": "no telemetry received yet"
        })),
    }
}

#[post("/insights/{id}/dismiss")]
async fn dismiss_insight_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.insights.dismiss_insight(&id) {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(error) => service_error_response(error),
    }
}

#[get("/preferences")]
async fn get_preferences_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.insights.preferences() {
        Ok(preferences) => HttpResponse::Ok().json(preferences),
        Err(error) => service_error_response(error),
    }
}

#[put("/preferences/filters")]
async fn update_filters_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<FilterUpdate>,
) -> impl Responder {
    let FilterUpdate { priorities, types } = body.into_inner();
    match state.insights.update_filters(priorities, types) {
        Ok(preferences) => HttpResponse::Ok().json(preferences),
        Err(error) => service_error_response(error),
    }
}

#[post("/preferences/reset")]
async fn reset_preferences_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.insights.reset_preferences() {
        Ok(preferences) => HttpResponse::Ok().json(preferences),
        Err(error) => service_error_response(error),
    }
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::LockPoisoned(name) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("{name} lock poisoned")
            }))
        }
        ServiceError::Store(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("store operation failed: {error}")
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, body::to_bytes, http::StatusCode, test, web};

    use crate::adapters::store::{PREFERENCES_KEY, SqliteStore, load_json};
    use crate::app::services::{
        CycleOutcome, InsightQueryHandler, InsightService, InsightSettings, PipelineState,
    };
    use crate::domain::aggregator::{InsightProfile, UserPreferences};
    use crate::domain::clock::TimestampMs;
    use crate::domain::insight::Priority;
    use crate::test_support::{metrics_with, temp_sqlite_store, weather_with};

    use super::{ApiState, configure_routes};

    fn settings() -> InsightSettings {
        InsightSettings {
            profile: InsightProfile::Simple,
            min_history_depth: 5,
            retrain_confidence: 70.0,
        }
    }

    fn build_state(name: &str) -> (ApiState, SqliteStore) {
        let store = temp_sqlite_store(name);
        let state = ApiState {
            insights: Arc::new(InsightService::load(Arc::new(store.clone()), settings())),
            pipeline: Arc::new(PipelineState::new(24)),
        };
        (state, store)
    }

    /// Runs one cycle with a hot battery under a thunderstorm.
    fn publish_hot_battery_cycle(state: &ApiState) {
        for index in 0..5 {
            state
                .pipeline
                .record_metrics(metrics_with(60.0, 40.0), TimestampMs(index * 10_000))
                .expect("metrics should be recorded");
        }
        state
            .pipeline
            .record_weather(weather_with(95, 25.0))
            .expect("weather should be recorded");

        let snapshot = state.pipeline.snapshot().expect("snapshot");
        let outcome = state
            .insights
            .run_cycle(&snapshot, 12, TimestampMs(1_700_000_000_000))
            .expect("cycle should run");
        assert!(matches!(outcome, CycleOutcome::Published { .. }));
    }

    async fn json_body(resp: actix_web::dev::ServiceResponse) -> serde_json::Value {
        let body = to_bytes(resp.into_body())
            .await
            .expect("body should be readable");
        serde_json::from_slice(&body).expect("body should be json")
    }

    #[actix_web::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = build_state("health");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn insights_return_no_content_before_first_cycle() {
        let (state, _) = build_state("insights-empty");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/insights").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn latest_metrics_returns_404_then_snapshot() {
        let (state, _) = build_state("metrics-latest");
        let pipeline = Arc::clone(&state.pipeline);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics/latest").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pipeline
            .record_metrics(metrics_with(72.0, 28.0), TimestampMs(0))
            .expect("metrics should be recorded");

        let req = test::TestRequest::get().uri("/metrics/latest").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = json_body(resp).await;
        assert_eq!(json["historyDepth"], 1);
        assert_eq!(json["metrics"]["batteryLevel"], 72.0);
        assert_eq!(json["metrics"]["activeSource"], "solar");
        assert_eq!(json["weather"], serde_json::Value::Null);
    }

    #[actix_web::test]
    async fn dismiss_removes_insight_from_published_list() {
        let (state, store) = build_state("dismiss");
        publish_hot_battery_cycle(&state);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/insights").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        let ids: Vec<&str> = json["insights"]
            .as_array()
            .expect("insights should be an array")
            .iter()
            .filter_map(|insight| insight["id"].as_str())
            .collect();
        assert!(ids.contains(&"battery-temp"));
        assert!(json["cycleId"].is_string());

        let req = test::TestRequest::post()
            .uri("/insights/battery-temp/dismiss")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let outcome = json_body(resp).await;
        assert_eq!(outcome["newlyDismissed"], true);
        assert_eq!(outcome["retrained"], false);

        let req = test::TestRequest::get().uri("/insights").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        let still_listed = json["insights"]
            .as_array()
            .expect("insights should be an array")
            .iter()
            .any(|insight| insight["id"] == "battery-temp");
        assert!(!still_listed);

        let persisted: UserPreferences = load_json(&store, PREFERENCES_KEY)
            .expect("preferences should load")
            .expect("preferences should be stored");
        assert!(persisted.dismissed.contains("battery-temp"));
    }

    #[actix_web::test]
    async fn filter_updates_persist_across_reload() {
        let (state, store) = build_state("filters");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/preferences/filters")
            .set_json(serde_json::json!({ "priorities": ["high"], "types": [] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["priorities"], serde_json::json!(["high"]));

        let reloaded = InsightService::load(Arc::new(store), settings());
        let preferences = reloaded.preferences().expect("preferences");
        assert_eq!(preferences.priorities.len(), 1);
        assert!(preferences.priorities.contains(&Priority::High));
        assert_eq!(preferences.types.len(), 5);
    }

    #[actix_web::test]
    async fn rejects_unknown_filter_values() {
        let (state, _) = build_state("filters-invalid");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/preferences/filters")
            .set_json(serde_json::json!({ "priorities": ["urgent"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn reset_clears_dismissals_and_filters() {
        let (state, _) = build_state("reset");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/insights/solar-low/dismiss")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let req = test::TestRequest::put()
            .uri("/preferences/filters")
            .set_json(serde_json::json!({ "types": ["tip"] }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/preferences/reset")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/preferences").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["dismissed"], serde_json::json!([]));
        assert_eq!(json["priorities"].as_array().map(Vec::len), Some(3));
        assert_eq!(json["types"].as_array().map(Vec::len), Some(5));
    }
}
