//! Translation of failures into response statuses.
//!
//! Failures are classified by [`FailureKind`] through [`ClassifiedFailure`], and an
//! [`ExceptionStatusMapper`] table maps kinds (and everything below them) to statuses.
//! [`error_response`] turns the result into a complete JSON response.

mod error_response;
mod failure;
mod mapper;

pub use error_response::ErrorResponse;
pub use error_response::error_response;
pub use failure::ClassifiedFailure;
pub use failure::Failure;
pub use failure::FailureKind;
pub use mapper::ExceptionStatusMapper;
pub use mapper::ExceptionStatusMapperBuilder;
