use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::Service;
use tower_layer::Layer;
use tracing::{debug, instrument};

use super::InferenceResult;
use crate::common::Frame;
use crate::session::SessionMetrics;

/// Records how long each classification takes.
#[derive(Clone)]
pub struct TimingLayer {
    metrics: Arc<SessionMetrics>,
}

impl TimingLayer {
    pub fn new(metrics: Arc<SessionMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for TimingLayer {
    type Service = Timed<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timed {
            inner,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

#[derive(Clone)]
pub struct Timed<S> {
    inner: S,
    metrics: Arc<SessionMetrics>,
}

impl<S> Service<Frame> for Timed<S>
where
    S: Service<Frame, Response = InferenceResult>,
    S::Error: Display + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = InferenceResult;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip(self, frame), fields(sequence = frame.sequence()))]
    fn call(&mut self, frame: Frame) -> Self::Future {
        let sequence = frame.sequence();
        let started = Instant::now();
        let metrics = Arc::clone(&self.metrics);
        let future = self.inner.call(frame.clone());

        Box::pin(async move {
            let result = future.await;
            let duration_us = started.elapsed().as_micros() as u64;
            metrics.record_inference(duration_us, result.is_ok());
            match &result {
                Ok(_) => debug!("Classified frame {} in {}us", sequence, duration_us),
                Err(e) => debug!(
                    "Classification of frame {} returned after {}us: {}",
                    sequence, duration_us, e
                ),
            }
            result
        })
    }
}
