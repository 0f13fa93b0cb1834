//! Pluggable stages run by the decoder adapters after a successful decode.
//!
//! The record type `T` is chosen by the deployment; the adapters never look
//! inside it. Plain functions and closures implement [`Transform`] and
//! [`Enrich`], so most callers never name these traits.

use crate::error::TransformError;
use crate::packet::EnrichmentContext;

/// Records produced from one wire message, plus the error that cut the
/// transform short, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput<T> {
    pub records: Vec<T>,
    pub error: Option<TransformError>,
}

impl<T> TransformOutput<T> {
    pub fn ok(records: Vec<T>) -> Self {
        Self {
            records,
            error: None,
        }
    }

    pub fn partial(records: Vec<T>, error: TransformError) -> Self {
        Self {
            records,
            error: Some(error),
        }
    }
}

impl<T> Default for TransformOutput<T> {
    fn default() -> Self {
        Self::ok(Vec::new())
    }
}

pub trait Transform<M, C, T>: Send + Sync {
    fn transform(&self, message: &M, config: &C) -> TransformOutput<T>;
}

impl<M, C, T, F> Transform<M, C, T> for F
where
    F: Fn(&M, &C) -> TransformOutput<T> + Send + Sync,
{
    fn transform(&self, message: &M, config: &C) -> TransformOutput<T> {
        self(message, config)
    }
}

pub trait Enrich<T>: Send + Sync {
    fn enrich(&self, record: &mut T, ctx: &EnrichmentContext);
}

impl<T, F> Enrich<T> for F
where
    F: Fn(&mut T, &EnrichmentContext) + Send + Sync,
{
    fn enrich(&self, record: &mut T, ctx: &EnrichmentContext) {
        self(record, ctx)
    }
}

/// Output sink. Called once per decoded packet with the whole batch, from
/// many workers at once.
pub trait Transport<T>: Send + Sync {
    fn publish(&self, records: Vec<T>);
}
