use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::capture::CameraStatus;
use super::loop_worker::{supervision_loop, SupervisionContext};

/// Owns one supervision loop task. Single use: a controller that has been
/// started cannot be started again, matching the one-session lifecycle.
pub struct SupervisionController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    capture_tx: Option<mpsc::Sender<()>>,
    camera_tx: Option<watch::Sender<CameraStatus>>,
    camera_rx: watch::Receiver<CameraStatus>,
}

impl SupervisionController {
    pub fn new() -> Self {
        let (camera_tx, camera_rx) = watch::channel(CameraStatus::Idle);
        Self {
            handle: None,
            cancel_token: None,
            capture_tx: None,
            camera_tx: Some(camera_tx),
            camera_rx,
        }
    }

    pub fn start(&mut self, ctx: SupervisionContext) -> Result<()> {
        if self.handle.is_some() {
            bail!("supervision already active");
        }
        let Some(camera_tx) = self.camera_tx.take() else {
            bail!("supervision controller already used");
        };

        info!("Starting supervision for session {}", ctx.session_id);

        let cancel_token = CancellationToken::new();
        // Capacity 1: a pending nudge already covers any that follow.
        let (capture_tx, capture_rx) = mpsc::channel(1);

        let handle = tokio::spawn(supervision_loop(ctx, cancel_token.clone(), capture_rx, camera_tx));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.capture_tx = Some(capture_tx);
        Ok(())
    }

    /// Ask for an opportunistic capture. The loop decides whether enough
    /// time has passed since the last one.
    pub fn request_capture(&self) {
        if let Some(tx) = &self.capture_tx {
            let _ = tx.try_send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn camera_status(&self) -> watch::Receiver<CameraStatus> {
        self.camera_rx.clone()
    }

    /// Cancel the loop and wait for it to exit. The camera is released by
    /// the time this returns.
    pub async fn stop(&mut self) -> Result<()> {
        self.capture_tx = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("supervision loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for SupervisionController {
    fn default() -> Self {
        Self::new()
    }
}
