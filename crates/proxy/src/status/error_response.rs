use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::status::{ClassifiedFailure, ExceptionStatusMapper};

/// The JSON body sent with a response generated for a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_message: String,
}

impl ErrorResponse {
    pub fn new<S: ToString>(error_message: S) -> Self {
        Self { error_message: error_message.to_string() }
    }

    /// A body carrying the canonical reason phrase of `status`.
    pub fn for_status(status: StatusCode) -> Self {
        Self::new(status.canonical_reason().unwrap_or("Unknown Error"))
    }
}

/// Builds the response for a request that failed before a response could be built.
///
/// The status comes from `mapper`, falling back to `500 Internal Server Error`. The body
/// names only the status, so failure details stay in the logs.
pub fn error_response(mapper: &ExceptionStatusMapper, failure: &dyn ClassifiedFailure) -> Response<Full<Bytes>> {
    let status = mapper.status_or_default(failure);
    debug!(failure = %failure, status = status.as_u16(), "responding to failed request");

    let body = match serde_json::to_vec(&ErrorResponse::for_status(status)) {
        Ok(json) => Bytes::from(json),
        Err(e) => {
            error!(cause = %e, "unable to serialize error response");
            Bytes::new()
        }
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Ok(content_type) = HeaderValue::from_str(mime::APPLICATION_JSON.as_ref()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}
