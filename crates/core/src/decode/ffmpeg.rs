use crate::decode::{AudioLoader, AudioSignal, DecodeError, Result};
use ffmpeg_sidecar::{download, paths::ffmpeg_path};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;

pub const DEFAULT_FFMPEG_DECODE_RATE_HZ: u32 = 22_050;

/// Decodes anything ffmpeg understands into mono f32 at a fixed rate.
#[derive(Clone, Debug)]
pub struct FfmpegAudioLoader {
    output_rate: u32,
}

impl Default for FfmpegAudioLoader {
    fn default() -> Self {
        Self {
            output_rate: DEFAULT_FFMPEG_DECODE_RATE_HZ,
        }
    }
}

impl FfmpegAudioLoader {
    pub fn new(output_rate: u32) -> Result<Self> {
        if output_rate == 0 {
            return Err(DecodeError::InvalidSignal(
                "ffmpeg output rate must be > 0".to_owned(),
            ));
        }
        Ok(Self { output_rate })
    }

    fn ensure_ffmpeg_available(&self) -> Result<()> {
        download::auto_download().map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))
    }

    fn parse_f32le_mono(raw: &[u8]) -> Result<Vec<f32>> {
        if raw.len() % 4 != 0 {
            return Err(DecodeError::InvalidPcm(format!(
                "f32le byte length must be multiple of 4, got {}",
                raw.len()
            )));
        }
        Ok(raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    async fn decode_with_ffmpeg(&self, path: &Path) -> Result<Vec<f32>> {
        if !path.is_file() {
            return Err(DecodeError::Io {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }

        let rate = self.output_rate.to_string();
        let output = tokio::process::Command::new(ffmpeg_path())
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(path)
            .args([
                "-vn", "-sn", "-dn", "-ac", "1", "-ar", rate.as_str(), "-f", "f32le", "-acodec",
                "pcm_f32le", "pipe:1",
            ])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
            .await
            .map_err(|e| DecodeError::FfmpegFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr_s = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(DecodeError::FfmpegFailed(format!(
                "exit_code={:?} stderr={stderr_s}",
                output.status.code()
            )));
        }

        Self::parse_f32le_mono(&output.stdout)
    }
}

impl AudioLoader for FfmpegAudioLoader {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<AudioSignal>> {
        async move {
            self.ensure_ffmpeg_available()?;
            let samples = self.decode_with_ffmpeg(path).await?;
            tracing::debug!(
                path = %path.display(),
                samples = samples.len(),
                sample_rate = self.output_rate,
                "decoded audio with ffmpeg"
            );
            AudioSignal::mono(samples, self.output_rate)
        }
        .boxed()
    }
}
