//! External media tool: format conversion and poster-frame extraction.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{RehostError, Result};

/// Collaborator that converts images and extracts video frames.
///
/// Both operations return the produced file's bytes. A tool that cannot be
/// started or exits with a non-zero code is a [`RehostError::Conversion`].
pub trait MediaProcessor: Send + Sync + 'static {
    /// Convert the file at `input` into `extension` (without the dot).
    fn convert_format(&self, input: &Path, extension: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Grab the first frame of the video at `video_url` as an `extension`
    /// image.
    fn poster_frame(&self, video_url: &str, extension: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// [`MediaProcessor`] that shells out to `ffmpeg`.
#[derive(Clone, Debug)]
pub struct FfmpegProcessor {
    ffmpeg_path: PathBuf,
}

impl FfmpegProcessor {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RehostError::Conversion(format!("failed to execute {}: {e}", self.ffmpeg_path.display())))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            tracing::error!("ffmpeg exited with {}: {stderr}", output.status);
            return Err(RehostError::Conversion(format!("ffmpeg exited with {}", output.status)));
        }
        if !stderr.trim().is_empty() {
            tracing::debug!("ffmpeg: {stderr}");
        }
        Ok(output.stdout)
    }
}

impl Default for FfmpegProcessor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl MediaProcessor for FfmpegProcessor {
    async fn convert_format(&self, input: &Path, extension: &str) -> Result<Vec<u8>> {
        let output = input.with_file_name(format!("{}.{extension}", uuid::Uuid::new_v4()));
        let input_arg = input.to_string_lossy();
        let output_arg = output.to_string_lossy();

        self.run(&["-y", "-i", &input_arg, &output_arg]).await?;

        let bytes = tokio::fs::read(&output).await?;
        if let Err(e) = tokio::fs::remove_file(&output).await {
            tracing::warn!("Failed to remove conversion output {}: {e}", output.display());
        }
        Ok(bytes)
    }

    async fn poster_frame(&self, video_url: &str, extension: &str) -> Result<Vec<u8>> {
        let codec = if extension.eq_ignore_ascii_case("png") { "png" } else { "mjpeg" };
        let frame = self
            .run(&["-y", "-i", video_url, "-frames:v", "1", "-f", "image2pipe", "-vcodec", codec, "pipe:1"])
            .await?;

        if frame.is_empty() {
            return Err(RehostError::Conversion(format!("no frame extracted from {video_url}")));
        }
        Ok(frame)
    }
}
