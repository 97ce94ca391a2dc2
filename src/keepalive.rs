//! RTSP keepalive reader (spec.md §3 "Keepalive reader", §4.4 step 5).
//!
//! `RecordingManager` holds one of these per active recording to keep an
//! on-demand media-server path's source process alive for the recording's
//! duration. Unlike the teacher's `CameraStream`, this pipeline never
//! ingests buffers for storage — it only needs to stay connected, so the
//! appsink is replaced with a `fakesink` and nothing is read back.

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::{ControllerError, Result};

/// A held-open RTSP connection against one media-server path.
pub struct KeepaliveReader {
    camera_id: String,
    pipeline: gst::Pipeline,
}

impl KeepaliveReader {
    /// Opens `rtsp://host:port/streamName` and parks a `fakesink` at the end
    /// of the pipeline so the connection stays live without buffering media.
    pub fn connect(url: &str, camera_id: &str) -> Result<Self> {
        gst::init().map_err(|e| ControllerError::GStreamer(format!("gst::init: {e}")))?;

        let pipeline_str = format!(
            "rtspsrc location={url} latency=200 protocols=tcp ! \
             fakesink sync=false async=false"
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| ControllerError::GStreamer(format!("parse_launch: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| ControllerError::GStreamer("not a pipeline".to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| ControllerError::GStreamer(format!("set_state Playing: {e}")))?;

        info!(camera = camera_id, url, "keepalive reader connected");
        Ok(Self { camera_id: camera_id.to_string(), pipeline })
    }

    pub fn stop(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        info!(camera = self.camera_id, "keepalive reader stopped");
    }

    /// True while the pipeline reports a playing state.
    pub fn is_alive(&self) -> bool {
        self.pipeline.state(gst::ClockTime::ZERO).1 == gst::State::Playing
    }
}

impl Drop for KeepaliveReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle returned to `RecordingManager`: stopping the keepalive is a signal
/// send plus a task join, matching the teacher's supervised-connect handle
/// shape (`camera.rs::supervised_connect`) but without the buffer channel.
pub struct KeepaliveHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl KeepaliveHandle {
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Spawns a supervised keepalive connection that reconnects on failure with
/// exponential backoff, mirroring `camera.rs::supervised_connect`'s retry
/// shape (capped at 60s), until `stop()` is called on the returned handle.
pub fn spawn_keepalive(url: String, camera_id: String) -> KeepaliveHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }

            match KeepaliveReader::connect(&url, &camera_id) {
                Ok(reader) => {
                    attempt = 0;
                    let mut liveness_check = tokio::time::interval(Duration::from_secs(1));
                    loop {
                        tokio::select! {
                            _ = &mut stop_rx => {
                                reader.stop();
                                return;
                            }
                            _ = liveness_check.tick() => {
                                if !reader.is_alive() {
                                    warn!(camera = camera_id, "keepalive pipeline died, reconnecting");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    attempt += 1;
                    let backoff = Duration::from_secs((2u64.pow(attempt.min(6))).min(60));
                    warn!(camera = camera_id, attempt, ?backoff, error = %e, "keepalive connect failed, retrying");
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = &mut stop_rx => {
                            return;
                        }
                    }
                }
            }
        }
    });

    KeepaliveHandle { stop_tx: Some(stop_tx), task }
}

#[allow(dead_code)]
fn log_unexpected_exit(camera_id: &str) {
    error!(camera = camera_id, "keepalive task exited without a stop signal");
}
