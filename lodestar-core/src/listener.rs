//! Listener contract: what the channel layer receives from a resolver.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::instance::ResolvedAddress;

/// Resolver-level failure surfaced to the listener. Never retried by the resolver itself.
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("UNAVAILABLE: {target}: {cause}")]
    Unavailable {
        target: String,
        cause: Arc<dyn StdError + Send + Sync>,
    },
}

#[derive(Error, Debug)]
#[error("name resolver returned an empty list")]
struct EmptyInstanceList;

impl ResolveError {
    pub fn unavailable<E>(target: &str, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ResolveError::Unavailable {
            target: target.to_string(),
            cause: Arc::new(cause),
        }
    }

    pub fn unavailable_empty(target: &str) -> Self {
        Self::unavailable(target, EmptyInstanceList)
    }

    pub fn target(&self) -> &str {
        match self {
            ResolveError::Unavailable { target, .. } => target,
        }
    }

    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        match self {
            ResolveError::Unavailable { cause, .. } => cause.as_ref(),
        }
    }
}

/// Outcome of one completed, non-aborted resolution attempt.
#[derive(Debug, Clone)]
pub enum ResolutionResult {
    /// May be empty when every instance lacked a usable port tag.
    AddressesResolved(Vec<ResolvedAddress>),
    ResolutionFailed(ResolveError),
}

impl ResolutionResult {
    pub fn addresses(&self) -> Option<&[ResolvedAddress]> {
        match self {
            ResolutionResult::AddressesResolved(addresses) => Some(addresses),
            ResolutionResult::ResolutionFailed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ResolveError> {
        match self {
            ResolutionResult::AddressesResolved(_) => None,
            ResolutionResult::ResolutionFailed(e) => Some(e),
        }
    }
}

/// Receives at most one result per completed attempt. Called from the pooled
/// executor without the resolver lock held, so it may call back into the resolver.
pub trait ResolverListener: Send + Sync {
    fn on_result(&self, result: ResolutionResult);
}

impl ResolverListener for mpsc::UnboundedSender<ResolutionResult> {
    fn on_result(&self, result: ResolutionResult) {
        if self.send(result).is_err() {
            tracing::debug!("resolution listener channel closed");
        }
    }
}

impl<L: ResolverListener + ?Sized> ResolverListener for Arc<L> {
    fn on_result(&self, result: ResolutionResult) {
        (**self).on_result(result)
    }
}

/// Closure adapter, see [`listener_fn`].
pub struct FnListener<F>(F);

impl<F> ResolverListener for FnListener<F>
where
    F: Fn(ResolutionResult) + Send + Sync,
{
    fn on_result(&self, result: ResolutionResult) {
        (self.0)(result)
    }
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnListener")
    }
}

pub fn listener_fn<F>(f: F) -> FnListener<F>
where
    F: Fn(ResolutionResult) + Send + Sync,
{
    FnListener(f)
}
