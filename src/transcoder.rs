//! External transcoder (spec.md §1, §4.3, §6 — "delegated to an external
//! FFmpeg process").
//!
//! This module only builds the command line and, for the direct-capture
//! snapshot tier, spawns it as a subprocess; it never touches codec bits.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ControllerError, Result};

/// Build the literal `runOnDemand` command line the media server spawns
/// (spec.md §4.3, "Transcoder command template"). No shell is involved —
/// the media server receives the argv verbatim.
pub fn run_on_demand_command(device: &str, host: &str, rtsp_port: u16, stream_name: &str) -> String {
    format!(
        "ffmpeg -f v4l2 -i {device} -c:v libx264 -preset ultrafast -tune zerolatency -f rtsp rtsp://{host}:{rtsp_port}/{stream_name}"
    )
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Grab a single frame from `device` into `output_path`. Blocks the
    /// caller up to `timeout`; used by snapshot Tier 1 (spec.md §4.5).
    async fn capture_frame(
        &self,
        device: &str,
        output_path: &str,
        timeout: std::time::Duration,
    ) -> Result<()>;
}

/// Spawns a local `ffmpeg` process non-blocking from the caller's
/// perspective (the tokio task await is what blocks, not the OS process).
pub struct FfmpegTranscoder;

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn capture_frame(
        &self,
        device: &str,
        output_path: &str,
        timeout: std::time::Duration,
    ) -> Result<()> {
        let mut cmd = tokio::process::Command::new("ffmpeg");
        cmd.args([
            "-y",
            "-f",
            "v4l2",
            "-i",
            device,
            "-frames:v",
            "1",
            output_path,
        ]);
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::null());

        debug!(device, output_path, "spawning ffmpeg for direct frame capture");

        let child = cmd.spawn().map_err(ControllerError::Io)?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ControllerError::Timeout(format!("ffmpeg capture on {device}")))?
            .map_err(ControllerError::Io)?;

        if !output.status.success() {
            warn!(device, status = ?output.status, "ffmpeg capture exited non-zero");
            return Err(ControllerError::MalformedResponse {
                operation: "capture_frame".to_string(),
                reason: format!("ffmpeg exited with {:?}", output.status),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_template_matches_spec_literal() {
        let cmd = run_on_demand_command("/dev/video0", "127.0.0.1", 8554, "camera0");
        assert_eq!(
            cmd,
            "ffmpeg -f v4l2 -i /dev/video0 -c:v libx264 -preset ultrafast -tune zerolatency -f rtsp rtsp://127.0.0.1:8554/camera0"
        );
    }
}
