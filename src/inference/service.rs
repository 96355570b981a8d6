use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::Semaphore;
use tower::timeout::error::Elapsed;
use tower::timeout::TimeoutLayer;
use tower::util::BoxService;
use tower::{BoxError, Service, ServiceBuilder, ServiceExt};

use super::{InferenceResult, PoseClassifier, TimingLayer};
use crate::common::Frame;
use crate::error::InferenceError;
use crate::session::SessionMetrics;

/// Runs a [`PoseClassifier`] on the blocking pool.
///
/// A blocking call cannot be aborted, so the model permit travels into the
/// blocking closure and is only returned once the model does. A caller that gave
/// up on a call (timeout, cancellation) cannot start another one until then.
#[derive(Clone)]
pub struct ClassifierService {
    classifier: Arc<dyn PoseClassifier>,
    model_permit: Arc<Semaphore>,
}

impl ClassifierService {
    pub fn new(classifier: Arc<dyn PoseClassifier>) -> Self {
        Self {
            classifier,
            model_permit: Arc::new(Semaphore::new(1)),
        }
    }
}

impl Service<Frame> for ClassifierService {
    type Response = InferenceResult;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, frame: Frame) -> Self::Future {
        let classifier = Arc::clone(&self.classifier);
        let model_permit = Arc::clone(&self.model_permit);
        Box::pin(async move {
            let permit = model_permit
                .acquire_owned()
                .await
                .map_err(|e| InferenceError::Interrupted(e.to_string()))?;
            let result = tokio::task::spawn_blocking(move || {
                let result = classifier.classify(&frame);
                drop(permit);
                result
            })
            .await
            .map_err(|e| InferenceError::Interrupted(e.to_string()))?;
            Ok::<_, BoxError>(result?)
        })
    }
}

/// The inference lane's handle on the classifier stack: timing, a single
/// in-flight call, and an optional deadline.
pub struct InferenceAdapter {
    service: BoxService<Frame, InferenceResult, BoxError>,
}

impl InferenceAdapter {
    pub fn new(
        classifier: Arc<dyn PoseClassifier>,
        timeout: Option<Duration>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let service = ServiceBuilder::new()
            .layer(TimingLayer::new(metrics))
            .concurrency_limit(1)
            .option_layer(timeout.map(TimeoutLayer::new))
            .service(ClassifierService::new(classifier));
        Self {
            service: BoxService::new(service),
        }
    }

    pub async fn classify(&mut self, frame: Frame) -> Result<InferenceResult, InferenceError> {
        let service = self.service.ready().await.map_err(into_inference_error)?;
        service.call(frame).await.map_err(into_inference_error)
    }
}

fn into_inference_error(error: BoxError) -> InferenceError {
    if let Some(inference_error) = error.downcast_ref::<InferenceError>() {
        return inference_error.clone();
    }
    if error.is::<Elapsed>() {
        return InferenceError::Timeout;
    }
    InferenceError::Interrupted(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraPosition;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier(Result<InferenceResult, InferenceError>);

    impl PoseClassifier for FixedClassifier {
        fn classify(&self, _frame: &Frame) -> Result<InferenceResult, InferenceError> {
            self.0.clone()
        }
    }

    struct SlowClassifier(Duration);

    impl PoseClassifier for SlowClassifier {
        fn classify(&self, _frame: &Frame) -> Result<InferenceResult, InferenceError> {
            std::thread::sleep(self.0);
            Ok(InferenceResult::single("tree", 0.9))
        }
    }

    #[derive(Default)]
    struct CountingClassifier {
        running: AtomicUsize,
        max_running: AtomicUsize,
        calls: AtomicUsize,
    }

    impl PoseClassifier for CountingClassifier {
        fn classify(&self, _frame: &Frame) -> Result<InferenceResult, InferenceError> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(InferenceResult::single("tree", 0.9))
        }
    }

    fn frame() -> Frame {
        Frame::new(
            0,
            CameraPosition::Front,
            DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(
                8,
                8,
                Rgb([255, 255, 255]),
            )),
        )
    }

    #[tokio::test]
    async fn test_classifier_service() {
        let mut service = ClassifierService::new(Arc::new(FixedClassifier(Ok(
            InferenceResult::single("plank", 0.8),
        ))));
        let response = service.call(frame()).await.unwrap();
        assert_eq!(response.top().unwrap().label.as_str(), "plank");
    }

    #[tokio::test]
    async fn adapter_preserves_inference_errors() {
        let metrics = Arc::new(SessionMetrics::new());
        let mut adapter = InferenceAdapter::new(
            Arc::new(FixedClassifier(Err(InferenceError::NoPersonDetected))),
            None,
            metrics.clone(),
        );
        assert_eq!(
            adapter.classify(frame()).await,
            Err(InferenceError::NoPersonDetected)
        );
        assert_eq!(metrics.snapshot().inference_failures, 1);
    }

    #[tokio::test]
    async fn adapter_times_out_slow_models() {
        let metrics = Arc::new(SessionMetrics::new());
        let mut adapter = InferenceAdapter::new(
            Arc::new(SlowClassifier(Duration::from_millis(200))),
            Some(Duration::from_millis(20)),
            metrics,
        );
        assert_eq!(adapter.classify(frame()).await, Err(InferenceError::Timeout));
    }

    #[tokio::test]
    async fn adapter_records_latency() {
        let metrics = Arc::new(SessionMetrics::new());
        let mut adapter = InferenceAdapter::new(
            Arc::new(SlowClassifier(Duration::from_millis(5))),
            None,
            metrics.clone(),
        );
        adapter.classify(frame()).await.unwrap();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.inferences_completed, 1);
        assert!(snapshot.max_inference_us >= 5_000);
    }

    #[tokio::test]
    async fn timed_out_calls_never_overlap_the_model() {
        let classifier = Arc::new(CountingClassifier::default());
        let mut adapter = InferenceAdapter::new(
            classifier.clone(),
            Some(Duration::from_millis(20)),
            Arc::new(SessionMetrics::new()),
        );
        for _ in 0..10 {
            assert_eq!(adapter.classify(frame()).await, Err(InferenceError::Timeout));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        // let the last abandoned call drain
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(classifier.max_running.load(Ordering::SeqCst), 1);
        assert!(classifier.calls.load(Ordering::SeqCst) < 10);
        assert_eq!(classifier.running.load(Ordering::SeqCst), 0);
    }
}
