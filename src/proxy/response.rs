//! Response bodies and canned error responses.

use super::error::ProxyError;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::{Response, StatusCode};

/// Body type of every response the relays produce.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Create an empty response body.
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
pub fn full_body(content: impl Into<Bytes>) -> ProxyBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Plain-text response with the given status.
pub fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(format!("{message}\n")));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}

/// Status code a failed relay attempt is reported with.
pub fn status_for(err: &ProxyError) -> StatusCode {
    match err {
        ProxyError::InvalidConnect(_) | ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Response reported to the client for a failed relay attempt.
pub fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let status = status_for(err);
    text_response(status, status.canonical_reason().unwrap_or("Error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::side_channel::{LANTERN_HOST, SideChannelError};

    #[test]
    fn test_missing_side_channel_is_bad_gateway() {
        let err = ProxyError::SideChannel(SideChannelError::Missing(LANTERN_HOST));
        assert_eq!(error_response(&err).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_invalid_request_is_bad_request() {
        let err = ProxyError::InvalidRequest("no host".into());
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_timeout_is_gateway_timeout() {
        assert_eq!(status_for(&ProxyError::Timeout), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_text_response_content_type() {
        let response = text_response(StatusCode::METHOD_NOT_ALLOWED, "nope");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["content-type"], "text/plain");
    }
}
