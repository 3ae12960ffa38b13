use std::{error::Error, fmt, sync::Arc};

use thiserror::Error as ThisError;

/// Canonical message for a non-positive demand signal.
pub(crate) const INVALID_REQUEST: &str = "invalid request, must be greater than 0";
/// Canonical message for a mapper that produced no publisher/item.
pub(crate) const MAPPER_RETURNED_NONE: &str = "the mapper returned no result";
/// Canonical message for a supplier that produced no publisher.
pub(crate) const SUPPLIER_RETURNED_NONE: &str = "the supplier returned no result";

/// A terminal failure flowing down a stream.
///
/// Failures are never retried by the runtime: they surface through the same
/// terminal path as completion, at most once per subscription, and upstream
/// cancellation accompanies every surfaced failure.
#[derive(Clone, ThisError)]
pub enum StreamError {
    /// A bounded buffer saturated even though the demand protocol was honored
    /// downstream. Distinct from user failures so consumers can tell an
    /// overwhelmed pipeline from a broken one.
    #[error("back-pressure: {0}")]
    BackPressure(String),

    /// The subscription protocol was violated: zero demand, an absent mapper
    /// or supplier result, or a signal outside the allowed order.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A failure produced by user code or by an upstream source.
    #[error("{0}")]
    Failure(Arc<dyn Error + Send + Sync + 'static>),

    /// Two or more failures collided, e.g. a failure hook failing while a
    /// failure was being delivered. Order of the parts is delivery order.
    #[error("composite failure ({} parts)", .0.len())]
    Composite(Vec<StreamError>),
}

impl StreamError {
    /// Wraps an arbitrary error value as a stream failure.
    pub fn failure(error: impl Error + Send + Sync + 'static) -> Self {
        StreamError::Failure(Arc::new(error))
    }

    pub(crate) fn invalid_request() -> Self {
        StreamError::Protocol(INVALID_REQUEST.to_owned())
    }

    pub(crate) fn mapper_returned_none() -> Self {
        StreamError::Protocol(MAPPER_RETURNED_NONE.to_owned())
    }

    pub(crate) fn supplier_returned_none() -> Self {
        StreamError::Protocol(SUPPLIER_RETURNED_NONE.to_owned())
    }

    /// Folds `other` into `self`, flattening nested composites one level so
    /// accumulation stays a flat list regardless of arrival order.
    pub(crate) fn compose(self, other: StreamError) -> StreamError {
        let mut parts = match self {
            StreamError::Composite(parts) => parts,
            single => vec![single],
        };
        match other {
            StreamError::Composite(more) => parts.extend(more),
            single => parts.push(single),
        }
        StreamError::Composite(parts)
    }

    pub fn is_back_pressure(&self) -> bool {
        matches!(self, StreamError::BackPressure(_))
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, StreamError::Protocol(_))
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::BackPressure(msg) => f.debug_tuple("BackPressure").field(msg).finish(),
            StreamError::Protocol(msg) => f.debug_tuple("Protocol").field(msg).finish(),
            StreamError::Failure(inner) => f.debug_tuple("Failure").field(&inner.to_string()).finish(),
            StreamError::Composite(parts) => f.debug_list().entries(parts.iter()).finish(),
        }
    }
}

/// The executor refused the drain task of an emit-on operator.
#[derive(Debug, ThisError)]
#[error("the executor rejected the task")]
pub struct TaskRejected;
