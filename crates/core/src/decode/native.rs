use crate::decode::{AudioLoader, AudioSignal, DecodeError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// In-process decoder. Keeps the native sample rate and channel layout.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaAudioLoader;

impl SymphoniaAudioLoader {
    pub fn new() -> Self {
        Self
    }

    fn decode_file(path: &Path) -> Result<AudioSignal> {
        let file = std::fs::File::open(path).map_err(|source| DecodeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Unsupported(format!("failed to probe audio: {e}")))?;

        let mut format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported("no audio track".to_owned()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut sample_rate = codec_params.sample_rate;
        let mut channels = codec_params.channels.map(|c| c.count() as u16);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(format!("failed to create decoder: {e}")))?;

        let mut out: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(DecodeError::Corrupt(format!("audio read error: {e}"))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => {
                    skipped_packets += 1;
                    continue;
                }
                Err(e) => return Err(DecodeError::Corrupt(format!("audio decode error: {e}"))),
            };

            let spec = *decoded.spec();
            if sample_rate.is_none() {
                sample_rate = Some(spec.rate);
            }
            if channels.is_none() {
                channels = Some(spec.channels.count() as u16);
            }

            let frames = decoded.capacity() as u64;
            let needs_new = match sample_buf.as_ref() {
                Some(b) => (b.capacity() as u64) < frames * spec.channels.count() as u64,
                None => true,
            };
            if needs_new {
                sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
            }

            if let Some(b) = sample_buf.as_mut() {
                b.copy_interleaved_ref(decoded);
                out.extend_from_slice(b.samples());
            }
        }

        if skipped_packets > 0 {
            tracing::warn!(
                path = %path.display(),
                skipped_packets,
                "skipped undecodable packets"
            );
        }

        let signal = finish_decode(out, skipped_packets, sample_rate, channels)?;
        tracing::debug!(
            path = %path.display(),
            sample_rate = signal.sample_rate(),
            channels = signal.channels(),
            samples = signal.samples().len(),
            "decoded audio"
        );
        Ok(signal)
    }
}

/// A stream whose packets all failed to decode is corrupt, not empty. Only a
/// stream with no packets at all yields an empty signal.
fn finish_decode(
    samples: Vec<f32>,
    skipped_packets: usize,
    sample_rate: Option<u32>,
    channels: Option<u16>,
) -> Result<AudioSignal> {
    if samples.is_empty() && skipped_packets > 0 {
        return Err(DecodeError::Corrupt(format!(
            "{skipped_packets} packets failed to decode, no audio recovered"
        )));
    }
    let sample_rate =
        sample_rate.ok_or_else(|| DecodeError::Unsupported("unknown sample rate".to_owned()))?;
    AudioSignal::new(samples, sample_rate, channels.unwrap_or(1))
}

impl AudioLoader for SymphoniaAudioLoader {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<AudioSignal>> {
        async move { Self::decode_file(path) }.boxed()
    }
}
