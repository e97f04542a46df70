use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, error, info, warn};

/// Logs one line per finished request, at a level matching its outcome.
///
/// Health probes are only logged at debug so they do not drown out real
/// traffic. Query strings are left out: the stream token travels in one.
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
        let path = req.path().to_string();
        let remote_addr = req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string();
        let is_probe = path.ends_with("/health");

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        error!(%method, %path, %remote_addr, status = status.as_u16(), duration_ms, "Request failed");
                    } else if status.is_client_error() {
                        warn!(%method, %path, %remote_addr, status = status.as_u16(), duration_ms, "Request rejected");
                    } else if is_probe {
                        debug!(%method, %path, status = status.as_u16(), duration_ms, "Health probe");
                    } else {
                        info!(%method, %path, %remote_addr, status = status.as_u16(), duration_ms, "Request completed");
                    }
                }
                Err(err) => {
                    let status = err.as_response_error().status_code();
                    warn!(%method, %path, %remote_addr, status = status.as_u16(), duration_ms, error = %err, "Request rejected");
                }
            }

            result
        })
    }
}
