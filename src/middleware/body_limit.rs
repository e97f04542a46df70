use crate::error::AppError;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};

/// Rejects requests whose declared `Content-Length` exceeds the limit with 413.
///
/// Chunked bodies carry no length; handlers enforce the same limit while
/// reading those.
pub struct BodyLimit {
    max_bytes: usize,
}

impl BodyLimit {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BodyLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = BodyLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BodyLimitMiddleware {
            service,
            max_bytes: self.max_bytes,
        }))
    }
}

pub struct BodyLimitMiddleware<S> {
    service: S,
    max_bytes: usize,
}

impl<S, B> Service<ServiceRequest> for BodyLimitMiddleware<S>
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
        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        if let Some(length) = declared {
            if length > self.max_bytes as u64 {
                let err = AppError::PayloadTooLarge(format!(
                    "Request body of {} bytes exceeds the {} byte limit",
                    length, self.max_bytes
                ));
                return Box::pin(async move { Err(err.into()) });
            }
        }

        let fut = self.service.call(req);
        Box::pin(fut)
    }
}
