//! Health and metrics endpoints.

use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

/// `GET /health`: liveness plus a summary of relay activity.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let memory_info = get_memory_info();
    let system_status = get_system_status(&config, &metrics);

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "voice-relay-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "active_sessions": metrics.active_sessions
        },
        "memory": memory_info,
        "services": {
            "upstream": {
                // Host only; the query string may carry the model name
                "host": upstream_host(&config.upstream.url)
            },
            "verifier": state.services.auth.verifier_name(),
            "store": state.services.store_backend,
            "completion_model": config.completion.model
        },
        "system": system_status
    }))
}

/// `GET /api/v1/metrics`: per-endpoint request stats and relay counters.
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "requests_per_second": ratio(metrics.request_count, uptime_seconds)
        },
        "relay": {
            "active_sessions": metrics.active_sessions,
            "sessions_opened": metrics.sessions_opened,
            "sessions_rejected": metrics.sessions_rejected,
            "upgrades_accepted": metrics.upgrades_accepted,
            "upgrades_refused": metrics.upgrades_refused,
            "auth_failures": metrics.auth_failures,
            "chat_queries": metrics.chat_queries,
            "frames_client_to_upstream": metrics.frames_client_to_upstream,
            "frames_upstream_to_client": metrics.frames_upstream_to_client,
            "frames_dropped": metrics.frames_dropped
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions,
            "token_verify_timeout_ms": config.auth.verify_timeout_ms
        }
    }))
}

fn upstream_host(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or_default()
        .to_string()
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let kb = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .unwrap_or(0)
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = kb() * 1024;
                } else if line.starts_with("VmSize:") {
                    vm_size = kb() * 1024;
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let session_usage = ratio(
        metrics.active_sessions as u64,
        config.performance.max_concurrent_sessions as u64,
    );

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": config.performance.max_concurrent_sessions,
        "current_sessions": metrics.active_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use actix_web::{test as actix_test, App};

    #[test]
    fn test_upstream_host() {
        assert_eq!(
            upstream_host("wss://api.openai.com/v1/realtime?model=x"),
            "api.openai.com"
        );
        assert_eq!(upstream_host("ws://127.0.0.1:9000"), "127.0.0.1:9000");
    }

    #[test]
    fn test_system_status_levels() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 10;
        let mut metrics = AppMetrics::default();

        assert_eq!(get_system_status(&config, &metrics)["status"], "normal");

        metrics.active_sessions = 8;
        assert_eq!(get_system_status(&config, &metrics)["status"], "moderate_load");

        metrics.active_sessions = 10;
        let status = get_system_status(&config, &metrics);
        assert_eq!(status["status"], "high_load");
        assert_eq!(status["load_warnings"].as_array().map(|w| w.len()), Some(1));
    }

    #[actix_web::test]
    async fn test_health_endpoint_reports_services() {
        let state = test_state(5);
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::configure_routes),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "voice-relay-backend");
        assert_eq!(body["services"]["verifier"], "static");
        assert_eq!(body["services"]["store"], "memory");
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_reports_relay_counters() {
        let state = test_state(5);
        state.record_auth_failure();
        state.record_chat_query();
        state.record_upgrade(true);
        state.record_upgrade(false);

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::configure_routes),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["relay"]["auth_failures"], 1);
        assert_eq!(body["relay"]["chat_queries"], 1);
        assert_eq!(body["relay"]["upgrades_accepted"], 1);
        assert_eq!(body["relay"]["upgrades_refused"], 1);
        assert_eq!(body["relay"]["active_sessions"], 0);
    }
}
