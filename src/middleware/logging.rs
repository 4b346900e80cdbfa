use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{info, error};

/// Query parameters whose values never reach the logs.
const REDACTED_PARAMS: &[&str] = &["token"];

/// Path and query of a request URI with credential values replaced by `REDACTED`.
pub fn redact_uri(path: &str, query: &str) -> String {
    if query.is_empty() {
        return path.to_string();
    }

    let redacted: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if REDACTED_PARAMS.contains(&key) => format!("{}=REDACTED", key),
            _ => pair.to_string(),
        })
        .collect();

    format!("{}?{}", path, redacted.join("&"))
}

/// Logs the start and end of every request. Websocket upgrades carry the client's ID
/// token in the query string, so the URI is redacted first.
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
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
        let uri = redact_uri(req.path(), req.query_string());
        let remote_addr = req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string();
        
        info!(
            method = %method,
            uri = %uri,
            remote_addr = %remote_addr,
            "Request started"
        );

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration = start_time.elapsed();

            match &result {
                Ok(response) => {
                    let status = response.status();
                    info!(
                        method = %method,
                        uri = %uri,
                        remote_addr = %remote_addr,
                        status = %status.as_u16(),
                        duration_ms = %duration.as_millis(),
                        "Request completed"
                    );
                }
                Err(err) => {
                    error!(
                        method = %method,
                        uri = %uri,
                        remote_addr = %remote_addr,
                        duration_ms = %duration.as_millis(),
                        error = %err,
                        "Request failed"
                    );
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_redacted() {
        assert_eq!(
            redact_uri("/ws", "token=eyJhbGciOi.secret&mode=chat"),
            "/ws?token=REDACTED&mode=chat"
        );
        assert_eq!(redact_uri("/ws/chat", "mode=audio&token="), "/ws/chat?mode=audio&token=REDACTED");
    }

    #[test]
    fn test_other_uris_unchanged() {
        assert_eq!(redact_uri("/health", ""), "/health");
        assert_eq!(redact_uri("/api/v1/metrics", "tokens=1&x"), "/api/v1/metrics?tokens=1&x");
    }
}
