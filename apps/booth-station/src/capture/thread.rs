//! Hosts a blocking, non-`Send` camera handle on a dedicated OS thread.

use std::{sync::mpsc as std_mpsc, thread};

use image::RgbaImage;
use tokio::sync::oneshot;
use tracing::warn;

use super::DeviceError;

type GrabReply = oneshot::Sender<Result<RgbaImage, DeviceError>>;

/// A camera driven synchronously from its own thread.
pub(crate) trait BlockingCamera {
    fn grab(&mut self) -> Result<RgbaImage, DeviceError>;
    /// Called once on the camera thread before the handle is dropped.
    fn stop(&mut self);
}

pub(crate) struct DeviceThread {
    name: String,
    requests: Option<std_mpsc::Sender<GrabReply>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DeviceThread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requests: None,
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.requests.is_some()
    }

    /// Spawn the thread and build the camera on it. Any previous thread is
    /// joined first, so the old handle is gone before the new one is created.
    pub async fn start<C, F>(&mut self, open: F) -> Result<(), DeviceError>
    where
        C: BlockingCamera,
        F: FnOnce() -> Result<C, DeviceError> + Send + 'static,
    {
        self.stop().await;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (requests, inbox) = std_mpsc::channel::<GrabReply>();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let mut camera = match open() {
                    Ok(camera) => {
                        let _ = ready_tx.send(Ok(()));
                        camera
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                while let Ok(reply) = inbox.recv() {
                    let _ = reply.send(camera.grab());
                }
                camera.stop();
            })
            .map_err(|err| DeviceError::Unavailable(format!("spawn camera thread: {err}")))?;
        self.thread = Some(handle);

        let ready = ready_rx
            .await
            .map_err(|_| DeviceError::Unavailable("camera thread exited".into()))
            .and_then(|opened| opened);
        match ready {
            Ok(()) => {
                self.requests = Some(requests);
                Ok(())
            }
            Err(err) => {
                self.join().await;
                Err(err)
            }
        }
    }

    pub async fn grab(&mut self) -> Result<RgbaImage, DeviceError> {
        let requests = self.requests.as_ref().ok_or(DeviceError::NotAcquired)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if requests.send(reply_tx).is_err() {
            self.requests = None;
            return Err(DeviceError::CaptureFailed("camera thread exited".into()));
        }
        reply_rx
            .await
            .map_err(|_| DeviceError::CaptureFailed("camera thread exited".into()))?
    }

    /// Close the request channel and wait until the camera has been stopped
    /// and dropped.
    pub async fn stop(&mut self) {
        self.requests = None;
        self.join().await;
    }

    async fn join(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!(name = %self.name, "camera thread panicked"),
            Err(err) => warn!(name = %self.name, error = %err, "failed to join camera thread"),
        }
    }
}
