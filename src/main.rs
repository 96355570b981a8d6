use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use posecoach::authorization::HostAuthorization;
use posecoach::camera::{SyntheticCameraBackend, SyntheticScene};
use posecoach::inference::{TemplateClassifier, TemplateModel};
use posecoach::{
    AppError, CameraAuthorizationStatus, Configuration, PoseCatalog, PoseLabel, SessionController,
    SessionEvent, StaticCatalog,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};

fn init_logging(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn load_classifier(
    configuration: &Configuration,
    catalog: &StaticCatalog,
) -> Result<TemplateClassifier, AppError> {
    let classifier = match &configuration.inference.model_path {
        Some(path) => TemplateClassifier::from_path(path)?,
        None => {
            info!("No model path configured, bootstrapping templates from the synthetic camera");
            TemplateClassifier::new(TemplateModel::bootstrap(
                &catalog.labels(),
                configuration.capture.frame_width,
                configuration.capture.frame_height,
                16,
            ))?
        }
    };
    Ok(classifier)
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config_path = std::env::var_os("POSECOACH_CONFIG").map(PathBuf::from);
    let configuration = Configuration::load(config_path.as_deref())?;
    init_logging(&configuration.logging.level);

    let target = PoseLabel::new(std::env::args().nth(1).unwrap_or_else(|| "tree".to_string()));
    let catalog = StaticCatalog::builtin();
    if let Some(pose) = catalog.lookup(&target) {
        info!("Practicing {} ({:?})", pose.name, pose.difficulty);
        for (step, instruction) in pose.instructions.iter().enumerate() {
            info!("  {}. {}", step + 1, instruction);
        }
    }
    let wrong_pose = catalog
        .labels()
        .into_iter()
        .find(|label| *label != target)
        .unwrap_or_else(|| target.clone());

    let scene = SyntheticScene::new();
    let backend = SyntheticCameraBackend::new(scene.clone())
        .with_frame_size(
            configuration.capture.frame_width,
            configuration.capture.frame_height,
        )
        .with_frame_interval(configuration.capture.frame_interval());
    let classifier = load_classifier(&configuration, &catalog)?;
    let authorization = HostAuthorization::new(CameraAuthorizationStatus::NotDetermined)
        .with_auto_response(CameraAuthorizationStatus::Authorized);
    let camera = configuration.capture.default_camera;

    let mut controller = SessionController::builder(configuration)
        .catalog(Arc::new(catalog))
        .authorization(Arc::new(authorization))
        .camera_backend(Arc::new(backend))
        .classifier(Arc::new(classifier))
        .build()?;

    let mut feedback_rx = controller.subscribe_feedback();
    let mut events_rx = controller.subscribe_events();
    let observer = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = feedback_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = feedback_rx.borrow_and_update().clone();
                    info!(
                        "{} (hits {}, misses {})",
                        snapshot.message(),
                        snapshot.consecutive_hits,
                        snapshot.consecutive_misses
                    );
                }
                event = events_rx.recv() => match event {
                    Ok(SessionEvent::SuggestTutorial { pose }) => {
                        info!("Having trouble? Watch the {} tutorial", pose);
                    }
                    Ok(event) => warn!("Session event: {:?}", event),
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} session events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    controller.start_session(target.clone(), camera).await?;

    let script = [
        (None, Duration::from_secs(2)),
        (Some(wrong_pose), Duration::from_secs(4)),
        (Some(target), Duration::from_secs(4)),
    ];
    for (pose, hold) in script {
        info!(
            "Scene: {}",
            pose.as_ref().map(PoseLabel::as_str).unwrap_or("nobody")
        );
        scene.set_pose(pose);
        tokio::select! {
            _ = tokio::time::sleep(hold) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break;
            }
        }
    }

    controller.stop_session().await;
    let metrics = controller.metrics();
    match serde_json::to_string(&metrics) {
        Ok(json) => info!("Session metrics: {}", json),
        Err(e) => error!("Failed to serialize metrics: {}", e),
    }

    drop(controller);
    let _ = observer.await;
    Ok(())
}
