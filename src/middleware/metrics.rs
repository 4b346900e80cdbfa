use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, StatusCode},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Counts every request and records per-endpoint duration and errors in [`AppState`].
///
/// Websocket upgrades are keyed by outcome (`WS /ws upgraded` for a 101, `WS /ws refused`
/// otherwise) and counted separately, so handshake timings never mix with refusals.
/// Session lifetimes are tracked by the relay itself.
pub struct MetricsMiddleware;

fn is_websocket_upgrade(req: &ServiceRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Endpoint key for one finished request.
fn endpoint_key(method: &str, path: &str, upgrade: bool, status: Option<StatusCode>) -> String {
    if !upgrade {
        return format!("{} {}", method, path);
    }
    match status {
        Some(StatusCode::SWITCHING_PROTOCOLS) => format!("WS {} upgraded", path),
        _ => format!("WS {} refused", path),
    }
}

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let upgrade = is_websocket_upgrade(&req);

        let state = req.app_data::<web::Data<AppState>>().cloned();
        if let Some(app_state) = &state {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration = start_time.elapsed();
            let duration_ms = duration.as_millis() as u64;

            let status = result.as_ref().ok().map(|response| response.status());
            let is_error = status.map_or(true, |status| {
                status.is_client_error() || status.is_server_error()
            });

            if let Some(app_state) = state {
                let endpoint = endpoint_key(&method, &path, upgrade, status);
                app_state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if upgrade {
                    app_state.record_upgrade(status == Some(StatusCode::SWITCHING_PROTOCOLS));
                }

                if is_error {
                    app_state.increment_error_count();
                }
            }

            result
        })
    }
}
