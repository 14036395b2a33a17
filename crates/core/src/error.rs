use std::any::Any;

use thiserror::Error;

use crate::adapter::BoxError;

/// Internal engine failures: programming-contract violations and adapter
/// I/O faults. Expected validation outcomes never appear here, they travel
/// as [`crate::validator::ValidatorResult`] data.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("handler failed: {source}")]
    Handler { source: BoxError },

    #[error("sending response content failed: {source}")]
    Send { source: BoxError },

    #[error("request pipeline panicked: {message}")]
    Panic { message: String },
}

impl EngineError {
    pub fn handler(source: BoxError) -> Self {
        Self::Handler { source }
    }

    pub fn send(source: BoxError) -> Self {
        Self::Send { source }
    }

    pub(crate) fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panic { message }
    }
}
