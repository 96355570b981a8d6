use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraAuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

impl CameraAuthorizationStatus {
    pub fn is_authorized(self) -> bool {
        self == Self::Authorized
    }
}

/// Authorization as the presentation layer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    /// A permission prompt is pending with the user.
    AwaitingUser,
    Resolved(CameraAuthorizationStatus),
    /// The prompt was not answered within the configured wait.
    Unresolved,
}

impl AuthorizationState {
    /// Banner text to show in place of feedback, if any.
    pub fn message(self) -> Option<&'static str> {
        match self {
            AuthorizationState::Resolved(CameraAuthorizationStatus::Denied)
            | AuthorizationState::Resolved(CameraAuthorizationStatus::Restricted)
            | AuthorizationState::Unresolved => {
                Some("Camera access required. Please enable in settings.")
            }
            _ => None,
        }
    }
}

/// Host permission primitives for camera access.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    fn status(&self) -> CameraAuthorizationStatus;

    /// Asks the user for access and resolves once they answer.
    async fn request_access(&self) -> CameraAuthorizationStatus;

    fn subscribe(&self) -> watch::Receiver<CameraAuthorizationStatus>;
}

/// In-process permission store. Status changes stand in for the user acting
/// in the host's settings.
pub struct HostAuthorization {
    status_tx: watch::Sender<CameraAuthorizationStatus>,
    auto_response: Option<CameraAuthorizationStatus>,
}

impl HostAuthorization {
    pub fn new(initial: CameraAuthorizationStatus) -> Self {
        let (status_tx, _) = watch::channel(initial);
        Self {
            status_tx,
            auto_response: None,
        }
    }

    pub fn granted() -> Self {
        Self::new(CameraAuthorizationStatus::Authorized)
    }

    /// Answers every prompt immediately with `response`.
    pub fn with_auto_response(mut self, response: CameraAuthorizationStatus) -> Self {
        self.auto_response = Some(response);
        self
    }

    pub fn set_status(&self, status: CameraAuthorizationStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!("Camera authorization changed to {:?}", status);
        }
    }

    pub fn grant(&self) {
        self.set_status(CameraAuthorizationStatus::Authorized);
    }

    pub fn deny(&self) {
        self.set_status(CameraAuthorizationStatus::Denied);
    }

    pub fn restrict(&self) {
        self.set_status(CameraAuthorizationStatus::Restricted);
    }
}

#[async_trait]
impl AuthorizationProvider for HostAuthorization {
    fn status(&self) -> CameraAuthorizationStatus {
        *self.status_tx.borrow()
    }

    async fn request_access(&self) -> CameraAuthorizationStatus {
        let current = self.status();
        if current != CameraAuthorizationStatus::NotDetermined {
            return current;
        }
        if let Some(response) = self.auto_response {
            self.set_status(response);
            return response;
        }

        debug!("Waiting for the user to answer the camera permission prompt");
        let mut status_rx = self.status_tx.subscribe();
        let status = match status_rx
            .wait_for(|status| *status != CameraAuthorizationStatus::NotDetermined)
            .await
        {
            Ok(status) => *status,
            Err(_) => CameraAuthorizationStatus::NotDetermined,
        };
        status
    }

    fn subscribe(&self) -> watch::Receiver<CameraAuthorizationStatus> {
        self.status_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn request_returns_known_status_without_waiting() {
        let authorization = HostAuthorization::new(CameraAuthorizationStatus::Denied);
        assert_eq!(
            authorization.request_access().await,
            CameraAuthorizationStatus::Denied
        );
    }

    #[tokio::test]
    async fn request_resolves_when_user_answers() {
        let authorization = Arc::new(HostAuthorization::new(
            CameraAuthorizationStatus::NotDetermined,
        ));
        let answering = authorization.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            answering.grant();
        });

        let status = authorization.request_access().await;
        assert_eq!(status, CameraAuthorizationStatus::Authorized);
    }

    #[tokio::test]
    async fn auto_response_answers_prompt() {
        let authorization = HostAuthorization::new(CameraAuthorizationStatus::NotDetermined)
            .with_auto_response(CameraAuthorizationStatus::Restricted);
        assert_eq!(
            authorization.request_access().await,
            CameraAuthorizationStatus::Restricted
        );
        assert_eq!(authorization.status(), CameraAuthorizationStatus::Restricted);
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let authorization = HostAuthorization::granted();
        let mut status_rx = authorization.subscribe();
        authorization.deny();
        status_rx.changed().await.unwrap();
        assert_eq!(*status_rx.borrow(), CameraAuthorizationStatus::Denied);
    }
}
