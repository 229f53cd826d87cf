//! Panic recovery decorator

use crate::pipeline::{category, PipelineError, PipelineResult, Processing};
use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Recovers panics from the inner processing and converts them into
/// `panic`-category errors. This is the only place where unstructured
/// failure is caught; it sits outermost so the consumer driver never sees
/// an unwinding task.
pub struct PanicGuard<T> {
    inner: T,
}

impl<T> PanicGuard<T> {
    /// Wrap the inner processing with panic recovery.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P, T> Processing<P> for PanicGuard<T>
where
    P: Send + Sync,
    T: Processing<P>,
{
    async fn process(&self, payload: &P) -> PipelineResult {
        match AssertUnwindSafe(self.inner.process(payload)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(PipelineError::new(
                category::PANIC,
                anyhow!("unexpected error: {}", panic_message(panic.as_ref())),
            )),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
