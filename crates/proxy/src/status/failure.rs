use std::fmt;

use crate::content::ContentError;

/// The kinds of failure the data plane distinguishes, arranged in a shallow hierarchy.
///
/// A kind matches itself and every kind below it, so a matcher for [`FailureKind::Origin`]
/// matches [`FailureKind::ResponseTimeout`] as well. [`FailureKind::Custom`] kinds let
/// embedders classify their own failures; they sit directly under [`FailureKind::Any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Any,

    Request,
    BadRequest,
    RequestTimeout,
    PayloadTooLarge,

    Origin,
    OriginUnreachable,
    NoAvailableHost,
    ResponseTimeout,
    BadOriginResponse,

    Transport,
    TransportLost,

    Content,
    InactiveSubscriber,
    AlreadySubscribed,
    ContentCancelled,

    ResourceExhausted,

    Custom(&'static str),
}

impl FailureKind {
    /// The kind directly above this one, `None` for [`FailureKind::Any`].
    pub fn parent(self) -> Option<FailureKind> {
        use FailureKind::*;
        match self {
            Any => None,
            Request | Origin | Transport | Content | ResourceExhausted | Custom(_) => Some(Any),
            BadRequest | RequestTimeout | PayloadTooLarge => Some(Request),
            OriginUnreachable | NoAvailableHost | ResponseTimeout | BadOriginResponse => Some(Origin),
            TransportLost => Some(Transport),
            InactiveSubscriber | AlreadySubscribed | ContentCancelled => Some(Content),
        }
    }

    /// Whether this kind is `ancestor` or lies anywhere below it.
    ///
    /// ```
    /// use micro_proxy::status::FailureKind;
    ///
    /// assert!(FailureKind::ResponseTimeout.is_a(FailureKind::Origin));
    /// assert!(FailureKind::ResponseTimeout.is_a(FailureKind::ResponseTimeout));
    /// assert!(!FailureKind::Origin.is_a(FailureKind::ResponseTimeout));
    /// ```
    pub fn is_a(self, ancestor: FailureKind) -> bool {
        let mut kind = Some(self);
        while let Some(current) = kind {
            if current == ancestor {
                return true;
            }
            kind = current.parent();
        }
        false
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Custom(name) => f.write_str(name),
            kind => fmt::Debug::fmt(kind, f),
        }
    }
}

/// A failure that knows its [`FailureKind`].
pub trait ClassifiedFailure: fmt::Display + fmt::Debug + Send + Sync {
    fn kind(&self) -> FailureKind;
}

impl ClassifiedFailure for ContentError {
    fn kind(&self) -> FailureKind {
        match self {
            ContentError::AlreadySubscribed => FailureKind::AlreadySubscribed,
            ContentError::InactiveSubscriber(_) => FailureKind::InactiveSubscriber,
            ContentError::Transport { .. } => FailureKind::TransportLost,
            ContentError::Cancelled { .. } => FailureKind::ContentCancelled,
        }
    }
}

/// A failure raised outside this crate, described by its kind and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    pub fn new<S: ToString>(kind: FailureKind, message: S) -> Self {
        Self { kind, message: message.to_string() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

impl ClassifiedFailure for Failure {
    fn kind(&self) -> FailureKind {
        self.kind
    }
}
