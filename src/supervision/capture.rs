//! Camera abstraction and scoped camera access.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::FrameRef;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera not ready after {0:?}")]
    NotReady(Duration),
    #[error("frame could not be decoded: {0}")]
    Decode(String),
}

/// One captured image plus the handle snapshots refer to it by.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameRef,
    pub captured_at: DateTime<Utc>,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            id: FrameRef(Uuid::new_v4().to_string()),
            captured_at: Utc::now(),
            image,
        }
    }

    /// Decode an encoded still (PNG, JPEG, ...) as delivered by most camera APIs.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, CaptureError> {
        let decoded = image::load_from_memory(bytes).map_err(|err| CaptureError::Decode(err.to_string()))?;
        Ok(Self::new(decoded.to_rgb8()))
    }
}

/// Live video/image feed.
///
/// `open` resolves once the device is delivering frames; `close` must be safe
/// to call more than once and on a device that never opened.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn open(&self) -> Result<(), CaptureError>;
    async fn get_frame(&self) -> Result<Frame, CaptureError>;
    fn close(&self);
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CameraStatus {
    #[default]
    Idle,
    Starting,
    Ready,
    Unavailable,
    Released,
}

/// Camera access for one supervision run. Dropping the lease closes the
/// device, so every exit path of the loop (cancel, abort, panic) releases it.
pub struct CameraLease {
    source: Arc<dyn CaptureSource>,
    status_tx: watch::Sender<CameraStatus>,
    ready: bool,
}

impl CameraLease {
    pub fn new(source: Arc<dyn CaptureSource>, status_tx: watch::Sender<CameraStatus>) -> Self {
        status_tx.send_replace(CameraStatus::Starting);
        Self {
            source,
            status_tx,
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Wait (bounded) for the device to come up. Cheap once ready.
    pub async fn ensure_ready(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        if self.ready {
            return Ok(());
        }

        let result = match tokio::time::timeout(timeout, self.source.open()).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::NotReady(timeout)),
        };

        match &result {
            Ok(()) => {
                self.ready = true;
                self.status_tx.send_replace(CameraStatus::Ready);
            }
            Err(err) => {
                log::warn!("Camera not available: {err}");
                self.status_tx.send_replace(CameraStatus::Unavailable);
            }
        }
        result
    }

    pub async fn frame(&mut self, ready_timeout: Duration) -> Result<Frame, CaptureError> {
        self.ensure_ready(ready_timeout).await?;
        match self.source.get_frame().await {
            Ok(frame) => Ok(frame),
            Err(err) => {
                // Force a re-open on the next cycle.
                self.ready = false;
                self.status_tx.send_replace(CameraStatus::Unavailable);
                Err(err)
            }
        }
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.source.close();
        self.status_tx.send_replace(CameraStatus::Released);
        log::info!("Camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        opens: AtomicUsize,
        closes: AtomicUsize,
        fail_open: bool,
    }

    #[async_trait]
    impl CaptureSource for CountingSource {
        async fn open(&self) -> Result<(), CaptureError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                Err(CaptureError::Unavailable("no device".into()))
            } else {
                Ok(())
            }
        }

        async fn get_frame(&self) -> Result<Frame, CaptureError> {
            Ok(Frame::new(RgbImage::new(4, 4)))
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn source(fail_open: bool) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_open,
        })
    }

    #[tokio::test]
    async fn lease_opens_once_and_releases_on_drop() {
        let src = source(false);
        let (tx, rx) = watch::channel(CameraStatus::Idle);
        {
            let mut lease = CameraLease::new(src.clone(), tx);
            assert_eq!(*rx.borrow(), CameraStatus::Starting);
            lease.frame(Duration::from_secs(1)).await.unwrap();
            lease.frame(Duration::from_secs(1)).await.unwrap();
            assert_eq!(*rx.borrow(), CameraStatus::Ready);
        }
        assert_eq!(src.opens.load(Ordering::SeqCst), 1);
        assert_eq!(src.closes.load(Ordering::SeqCst), 1);
        assert_eq!(*rx.borrow(), CameraStatus::Released);
    }

    #[tokio::test]
    async fn failed_open_still_releases() {
        let src = source(true);
        let (tx, rx) = watch::channel(CameraStatus::Idle);
        {
            let mut lease = CameraLease::new(src.clone(), tx);
            let err = lease.frame(Duration::from_secs(1)).await.unwrap_err();
            assert_eq!(err, CaptureError::Unavailable("no device".into()));
            assert_eq!(*rx.borrow(), CameraStatus::Unavailable);
        }
        assert_eq!(src.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn decodes_encoded_frames() {
        let mut png = Vec::new();
        RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let frame = Frame::from_encoded(&png).unwrap();
        assert_eq!(frame.image.dimensions(), (2, 2));
        assert!(matches!(Frame::from_encoded(b"nope"), Err(CaptureError::Decode(_))));
    }
}
