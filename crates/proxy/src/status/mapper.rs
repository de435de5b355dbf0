use std::fmt;

use http::StatusCode;
use once_cell::sync::Lazy;
use tracing::error;

use crate::status::{ClassifiedFailure, FailureKind};

static GLOBAL: Lazy<ExceptionStatusMapper> = Lazy::new(ExceptionStatusMapper::proxy_defaults);

/// Translates failures into response statuses for requests that failed before a response
/// could be built.
///
/// The table is fixed once built. A failure may match matchers registered under several
/// statuses; that is a configuration mistake, reported at lookup time by returning `None`
/// rather than guessing:
///
/// ```
/// use http::StatusCode;
/// use micro_proxy::status::{ExceptionStatusMapper, Failure, FailureKind};
///
/// let mapper = ExceptionStatusMapper::builder()
///     .add(StatusCode::BAD_GATEWAY, [FailureKind::Origin])
///     .add(StatusCode::GATEWAY_TIMEOUT, [FailureKind::ResponseTimeout])
///     .build();
///
/// let unreachable = Failure::new(FailureKind::OriginUnreachable, "connection refused");
/// assert_eq!(mapper.status_for(&unreachable), Some(StatusCode::BAD_GATEWAY));
///
/// // matches both Origin and ResponseTimeout
/// let timeout = Failure::new(FailureKind::ResponseTimeout, "no response in 30s");
/// assert_eq!(mapper.status_for(&timeout), None);
/// ```
#[derive(Clone)]
pub struct ExceptionStatusMapper {
    entries: Vec<(StatusCode, Vec<FailureKind>)>,
}

impl ExceptionStatusMapper {
    pub fn builder() -> ExceptionStatusMapperBuilder {
        ExceptionStatusMapperBuilder { entries: Vec::new() }
    }

    /// The table used by the proxy when nothing else is configured.
    pub fn proxy_defaults() -> Self {
        use FailureKind::*;
        Self::builder()
            .add(StatusCode::BAD_REQUEST, [BadRequest])
            .add(StatusCode::REQUEST_TIMEOUT, [RequestTimeout, InactiveSubscriber])
            .add(StatusCode::PAYLOAD_TOO_LARGE, [PayloadTooLarge])
            .add(StatusCode::BAD_GATEWAY, [OriginUnreachable, BadOriginResponse])
            .add(StatusCode::SERVICE_UNAVAILABLE, [NoAvailableHost, ResourceExhausted])
            .add(StatusCode::GATEWAY_TIMEOUT, [ResponseTimeout])
            .build()
    }

    /// The process-wide mapper holding [`ExceptionStatusMapper::proxy_defaults`], built on
    /// first use.
    pub fn global() -> &'static ExceptionStatusMapper {
        &GLOBAL
    }

    /// The status `failure` maps to, if exactly one matcher accepts it.
    pub fn status_for(&self, failure: &dyn ClassifiedFailure) -> Option<StatusCode> {
        let kind = failure.kind();
        let mut matching = self
            .entries
            .iter()
            .flat_map(|(status, matchers)| matchers.iter().map(move |matcher| (*status, *matcher)))
            .filter(|(_, matcher)| kind.is_a(*matcher))
            .map(|(status, _)| status)
            .collect::<Vec<_>>();
        matching.sort_by_key(StatusCode::as_u16);

        if matching.len() > 1 {
            let statuses = matching.iter().map(StatusCode::as_str).collect::<Vec<_>>();
            error!(failure = %failure, kind = %kind, statuses = ?statuses, "multiple matching statuses for failure");
            return None;
        }

        matching.first().copied()
    }

    /// The mapped status, or `500 Internal Server Error` when there is none.
    pub fn status_or_default(&self, failure: &dyn ClassifiedFailure) -> StatusCode {
        self.status_for(failure).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl fmt::Debug for ExceptionStatusMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(status, matchers)| (status.as_u16(), matchers))).finish()
    }
}

#[derive(Debug)]
pub struct ExceptionStatusMapperBuilder {
    entries: Vec<(StatusCode, Vec<FailureKind>)>,
}

impl ExceptionStatusMapperBuilder {
    /// Maps every failure of the given kinds, or below them, to `status`. Repeated statuses
    /// accumulate their matchers.
    pub fn add<I>(mut self, status: StatusCode, matchers: I) -> Self
    where
        I: IntoIterator<Item = FailureKind>,
    {
        match self.entries.iter_mut().find(|(existing, _)| *existing == status) {
            Some((_, existing)) => existing.extend(matchers),
            None => self.entries.push((status, matchers.into_iter().collect())),
        }
        self
    }

    pub fn build(self) -> ExceptionStatusMapper {
        ExceptionStatusMapper { entries: self.entries }
    }
}
