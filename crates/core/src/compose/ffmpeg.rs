use crate::compose::{ComposeError, ComposeJob, ComposeOutput, Compositor};
use crate::config::RenderSettings;
use crate::sequence::PoseSpan;
use crate::sprites::PosePaths;
use ffmpeg_sidecar::{download, paths::ffmpeg_path};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

const CONCAT_FILE: &str = "timeline.ffconcat";
const EXHAUSTION_MARKERS: &[&str] = &[
    "Cannot allocate memory",
    "No space left on device",
    "Out of memory",
    "out of memory",
];

/// Renders through the ffmpeg concat demuxer: each pose is written to disk
/// once and referenced by every run that shows it.
#[derive(Clone, Debug, Default)]
pub struct FfmpegCompositor {
    settings: RenderSettings,
}

impl FfmpegCompositor {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    fn ensure_ffmpeg_available(&self) -> Result<(), ComposeError> {
        download::auto_download().map_err(|e| ComposeError::FfmpegUnavailable(e.to_string()))
    }

    async fn render(&self, job: ComposeJob<'_>) -> Result<ComposeOutput, ComposeError> {
        if job.timeline.is_empty() {
            return Err(ComposeError::EmptyTimeline);
        }
        self.ensure_ffmpeg_available()?;

        // Dropped on every exit path, taking the pose PNGs and script with it.
        let workdir = tempfile::Builder::new()
            .prefix("lipflap-")
            .tempdir()
            .map_err(|e| ComposeError::from_io("creating scratch directory", e))?;

        let poses = job.sprites.write_png(workdir.path())?;
        let runs = job.timeline.runs();
        let script_path = workdir.path().join(CONCAT_FILE);
        tokio::fs::write(&script_path, concat_script(&runs, &poses))
            .await
            .map_err(|e| ComposeError::from_io("writing concat script", e))?;

        let duration = job.timeline.total_duration();
        let args = ffmpeg_args(
            &self.settings,
            &script_path,
            job.audio,
            job.output,
            job.fps.get(),
            duration,
        );

        tracing::info!(
            output = %job.output.display(),
            spans = job.timeline.len(),
            runs = runs.len(),
            seconds = duration.as_secs_f64(),
            "rendering video"
        );

        let result = tokio::process::Command::new(ffmpeg_path())
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .output()
            .await;

        let failure = match result {
            Ok(output) if output.status.success() => None,
            Ok(output) => Some(classify_failure(
                output.status.code(),
                &String::from_utf8_lossy(&output.stderr),
            )),
            Err(e) => Some(ComposeError::from_io("running ffmpeg", e)),
        };

        if let Some(err) = failure {
            discard_partial_output(job.output).await;
            return Err(err);
        }

        if let Err(e) = workdir.close() {
            tracing::warn!(error = %e, "failed to remove scratch directory");
        }

        Ok(ComposeOutput {
            path: job.output.to_path_buf(),
            duration,
            spans: job.timeline.len(),
            runs: runs.len(),
        })
    }
}

impl Compositor for FfmpegCompositor {
    fn compose<'a>(
        &'a self,
        job: ComposeJob<'a>,
    ) -> BoxFuture<'a, Result<ComposeOutput, ComposeError>> {
        self.render(job).boxed()
    }
}

async fn discard_partial_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => tracing::debug!(output = %output.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, output = %output.display(), "failed to remove partial output"),
    }
}

fn quote_concat_path(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

fn concat_script(runs: &[PoseSpan], poses: &PosePaths) -> String {
    let mut lines = vec!["ffconcat version 1.0".to_owned()];
    for run in runs {
        lines.push(format!("file {}", quote_concat_path(poses.for_state(run.state))));
        lines.push(format!("duration {:.6}", run.duration.as_secs_f64()));
    }
    // The demuxer ignores the duration of the final entry unless it is followed
    // by another file line.
    if let Some(last) = runs.last() {
        lines.push(format!("file {}", quote_concat_path(poses.for_state(last.state))));
    }
    let mut script = lines.join("\n");
    script.push('\n');
    script
}

fn ffmpeg_args(
    settings: &RenderSettings,
    script: &Path,
    audio: &Path,
    output: &Path,
    fps: u32,
    duration: Duration,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-f", "concat", "-safe", "0",
        "-i",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(script.into());
    args.push("-i".into());
    args.push(audio.into());
    for a in [
        "-map".to_owned(),
        "0:v:0".to_owned(),
        "-map".to_owned(),
        "1:a:0".to_owned(),
        "-r".to_owned(),
        fps.to_string(),
        "-c:v".to_owned(),
        "libx264".to_owned(),
        "-preset".to_owned(),
        settings.x264_preset.clone(),
        "-pix_fmt".to_owned(),
        settings.pixel_format.clone(),
        "-c:a".to_owned(),
        "aac".to_owned(),
        // Pad short audio with silence, then cut both streams to the timeline.
        "-af".to_owned(),
        "apad".to_owned(),
        "-t".to_owned(),
        format!("{:.6}", duration.as_secs_f64()),
        "-movflags".to_owned(),
        "+faststart".to_owned(),
    ] {
        args.push(a.into());
    }
    args.push(output.into());
    args
}

fn classify_failure(exit_code: Option<i32>, stderr: &str) -> ComposeError {
    let stderr = stderr.trim();
    if EXHAUSTION_MARKERS.iter().any(|m| stderr.contains(m)) {
        return ComposeError::ResourceExhausted {
            details: stderr.to_owned(),
        };
    }
    match exit_code {
        // Terminated by a signal, which on a memory-starved host is usually
        // the OOM killer.
        None => ComposeError::ResourceExhausted {
            details: format!("ffmpeg was killed before finishing: {stderr}"),
        },
        Some(code) => ComposeError::EncodeFailed(format!("exit_code={code} stderr={stderr}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameRate;
    use crate::envelope::frames_from_values;
    use crate::sequence::{FrameSequencer, MouthState, PoseTimeline};
    use crate::sprites::test_support::pose_bytes;
    use crate::sprites::PoseSprites;
    use crate::threshold::{FixedThreshold, ThresholdPolicy};
    use std::path::PathBuf;

    fn timeline(values: &[f32]) -> PoseTimeline {
        let frames = frames_from_values(
            values,
            FrameRate::default(),
            Duration::from_millis(100 * values.len() as u64),
        );
        let threshold = FixedThreshold::new(0.03).unwrap().resolve(&frames);
        FrameSequencer::default().sequence(&frames, threshold)
    }

    fn poses() -> PosePaths {
        PosePaths {
            open: PathBuf::from("/tmp/w/frame_open.png"),
            closed: PathBuf::from("/tmp/w/frame_closed.png"),
        }
    }

    #[test]
    fn concat_script_lists_runs_and_repeats_last_file() {
        let t = timeline(&[0.0, 0.0, 0.05, 0.05, 0.05, 0.0]);
        let script = concat_script(&t.runs(), &poses());
        let expected = "ffconcat version 1.0\n\
            file '/tmp/w/frame_closed.png'\n\
            duration 0.200000\n\
            file '/tmp/w/frame_open.png'\n\
            duration 0.300000\n\
            file '/tmp/w/frame_closed.png'\n\
            duration 0.100000\n\
            file '/tmp/w/frame_closed.png'\n";
        assert_eq!(script, expected);
    }

    #[test]
    fn concat_script_references_only_two_images() {
        let t = timeline(&[0.0, 0.5, 0.0, 0.5, 0.0, 0.5, 0.0, 0.5]);
        let script = concat_script(&t.runs(), &poses());
        let mut files: Vec<&str> = script.lines().filter(|l| l.starts_with("file ")).collect();
        files.sort_unstable();
        files.dedup();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn single_quotes_in_paths_are_escaped() {
        let quoted = quote_concat_path(Path::new("/tmp/it's/open.png"));
        assert_eq!(quoted, r"'/tmp/it'\''s/open.png'");
    }

    #[test]
    fn args_pin_codecs_fps_and_duration() {
        let args = ffmpeg_args(
            &RenderSettings::default(),
            Path::new("/tmp/w/timeline.ffconcat"),
            Path::new("in.mp3"),
            Path::new("out.mp4"),
            10,
            Duration::from_millis(1_050),
        );
        let joined = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        assert!(joined.contains("-f concat -safe 0 -i /tmp/w/timeline.ffconcat -i in.mp3"));
        assert!(joined.contains("-r 10"));
        assert!(joined.contains("-c:v libx264 -preset ultrafast -pix_fmt yuv420p"));
        assert!(joined.contains("-c:a aac -af apad -t 1.050000"));
        assert!(joined.ends_with("out.mp4"));
    }

    #[test]
    fn memory_errors_are_resource_exhaustion() {
        let err = classify_failure(Some(1), "x264 [error]: malloc: Cannot allocate memory");
        assert!(matches!(err, ComposeError::ResourceExhausted { .. }));
        let err = classify_failure(None, "");
        assert!(matches!(err, ComposeError::ResourceExhausted { .. }));
    }

    #[test]
    fn other_failures_keep_stderr_verbatim() {
        let err = classify_failure(Some(1), "Unknown encoder 'libx264'\n");
        match err {
            ComposeError::EncodeFailed(msg) => assert!(msg.contains("Unknown encoder 'libx264'")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_timeline_is_refused_before_touching_ffmpeg() {
        let sprites = PoseSprites::from_bytes(&pose_bytes(), 4).unwrap();
        let empty = PoseTimeline::default();
        let job = ComposeJob {
            timeline: &empty,
            sprites: &sprites,
            audio: Path::new("in.wav"),
            output: Path::new("out.mp4"),
            fps: FrameRate::default(),
        };
        let err = FfmpegCompositor::default().compose(job).await.unwrap_err();
        assert!(matches!(err, ComposeError::EmptyTimeline));
    }

    #[test]
    fn runs_cover_whole_timeline() {
        let t = timeline(&[0.05, 0.05, 0.0]);
        let runs = t.runs();
        assert_eq!(runs[0].state, MouthState::Open);
        let total: Duration = runs.iter().map(|r| r.duration).sum();
        assert_eq!(total, t.total_duration());
    }
}
