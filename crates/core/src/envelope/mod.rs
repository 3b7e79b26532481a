//! Loudness envelope: one scalar per animation step.
//!
//! The step grid is computed in integer nanoseconds so that the frames tile
//! `[0, duration)` exactly: frame `i` starts at `i / fps` and the last frame is
//! shortened to end at the clip duration.

mod resample;

use crate::config::{EnvelopeStrategy, FrameRate};
use crate::decode::AudioSignal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoudnessFrame {
    pub index: usize,
    pub start: Duration,
    pub duration: Duration,
    pub loudness: f32,
}

impl LoudnessFrame {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Step boundaries for a clip of a given length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGrid {
    fps: u32,
    total_nanos: u128,
    count: usize,
}

impl FrameGrid {
    pub fn new(total: Duration, fps: FrameRate) -> Self {
        let fps = fps.get();
        let total_nanos = total.as_nanos();
        let count = (total_nanos * u128::from(fps)).div_ceil(NANOS_PER_SEC);
        Self {
            fps,
            total_nanos,
            count: usize::try_from(count).unwrap_or(usize::MAX),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn boundary_nanos(&self, i: usize) -> u128 {
        (i as u128 * NANOS_PER_SEC / u128::from(self.fps)).min(self.total_nanos)
    }

    /// `(start, duration)` of step `i`.
    pub fn span(&self, i: usize) -> (Duration, Duration) {
        let start = self.boundary_nanos(i);
        let end = self.boundary_nanos(i + 1);
        (nanos_to_duration(start), nanos_to_duration(end - start))
    }

    /// First sample index of step `i` at `rate` Hz, i.e. `floor(i * rate / fps)`.
    fn sample_index(&self, i: usize, rate: u32) -> usize {
        let idx = i as u128 * u128::from(rate) / u128::from(self.fps);
        usize::try_from(idx).unwrap_or(usize::MAX)
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvelopeExtractor {
    fps: FrameRate,
    strategy: EnvelopeStrategy,
}

impl EnvelopeExtractor {
    pub fn new(fps: FrameRate, strategy: EnvelopeStrategy) -> Self {
        Self { fps, strategy }
    }

    /// Pure function of the signal: the same input always yields the same frames.
    /// A zero-length signal yields no frames.
    pub fn extract(&self, signal: &AudioSignal) -> Vec<LoudnessFrame> {
        if signal.is_empty() {
            return Vec::new();
        }
        let grid = FrameGrid::new(signal.duration(), self.fps);
        let values = match self.strategy {
            EnvelopeStrategy::PerStep => per_step_peaks(signal, &grid),
            EnvelopeStrategy::WholeClip { analysis_rate } => {
                whole_clip_levels(signal, &grid, analysis_rate.hz())
            }
        };
        assemble(&grid, |i| values[i])
    }
}

/// Builds frames from a precomputed per-step loudness array. Steps beyond the
/// end of `values` reuse the last value.
pub fn frames_from_values(values: &[f32], fps: FrameRate, total: Duration) -> Vec<LoudnessFrame> {
    let grid = FrameGrid::new(total, fps);
    assemble(&grid, |i| pick_clamped(values, i))
}

fn assemble(grid: &FrameGrid, loudness_at: impl Fn(usize) -> f32) -> Vec<LoudnessFrame> {
    (0..grid.len())
        .map(|index| {
            let (start, duration) = grid.span(index);
            LoudnessFrame {
                index,
                start,
                duration,
                loudness: loudness_at(index),
            }
        })
        .collect()
}

fn pick_clamped(values: &[f32], index: usize) -> f32 {
    match values.len() {
        0 => 0.0,
        len => values[index.min(len - 1)],
    }
}

fn per_step_peaks(signal: &AudioSignal, grid: &FrameGrid) -> Vec<f32> {
    let channels = usize::from(signal.channels());
    let frames = signal.frames();
    let rate = signal.sample_rate();
    let samples = signal.samples();

    (0..grid.len())
        .map(|i| {
            let start = grid.sample_index(i, rate).min(frames);
            let end = grid.sample_index(i + 1, rate).min(frames);
            samples[start * channels..end * channels]
                .iter()
                .fold(0.0f32, |peak, s| peak.max(s.abs()))
        })
        .collect()
}

fn whole_clip_levels(signal: &AudioSignal, grid: &FrameGrid, analysis_rate: u32) -> Vec<f32> {
    let mono = signal.to_mono();
    let (levels, rate) = if signal.sample_rate() == analysis_rate {
        (mono, analysis_rate)
    } else {
        match resample::to_rate(&mono, signal.sample_rate(), analysis_rate) {
            Ok(resampled) => (resampled, analysis_rate),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    from_hz = signal.sample_rate(),
                    to_hz = analysis_rate,
                    "resampling failed; analysing at the native rate"
                );
                (mono, signal.sample_rate())
            }
        }
    };

    tracing::debug!(
        analysis_samples = levels.len(),
        analysis_rate = rate,
        steps = grid.len(),
        "whole-clip envelope pass"
    );

    (0..grid.len())
        .map(|i| pick_clamped(&levels, grid.sample_index(i, rate)).abs())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisRate;

    fn fps(n: u32) -> FrameRate {
        FrameRate::new(n).unwrap()
    }

    fn whole_clip(hz: u32) -> EnvelopeStrategy {
        EnvelopeStrategy::WholeClip {
            analysis_rate: AnalysisRate::new(hz).unwrap(),
        }
    }

    fn assert_contiguous(frames: &[LoudnessFrame], total: Duration) {
        let mut cursor = Duration::ZERO;
        for f in frames {
            assert_eq!(f.start, cursor, "gap or overlap at frame {}", f.index);
            assert!(f.duration > Duration::ZERO);
            cursor = f.end();
        }
        assert_eq!(cursor, total);
    }

    #[test]
    fn empty_signal_yields_no_frames() {
        let signal = AudioSignal::mono(Vec::new(), 22_050).unwrap();
        for strategy in [EnvelopeStrategy::PerStep, whole_clip(4_000)] {
            let frames = EnvelopeExtractor::new(fps(10), strategy).extract(&signal);
            assert!(frames.is_empty());
        }
    }

    #[test]
    fn frame_count_is_ceil_of_duration_times_fps() {
        for (n, rate, f, expected) in [
            (8_000usize, 8_000u32, 10u32, 10usize),
            (8_400, 8_000, 10, 11),
            (22_050, 22_050, 8, 8),
            (1, 44_100, 10, 1),
            (44_101, 44_100, 9, 10),
        ] {
            let signal = AudioSignal::mono(vec![0.0; n], rate).unwrap();
            let frames = EnvelopeExtractor::new(fps(f), EnvelopeStrategy::PerStep).extract(&signal);
            assert_eq!(frames.len(), expected, "n={n} rate={rate} fps={f}");
            assert_contiguous(&frames, signal.duration());
        }
    }

    #[test]
    fn trailing_partial_step_is_shortened_not_dropped() {
        // 1.05 s at 10 fps: ten full steps plus a 50 ms tail.
        let signal = AudioSignal::mono(vec![0.0; 8_400], 8_000).unwrap();
        let frames = EnvelopeExtractor::new(fps(10), whole_clip(8_000)).extract(&signal);
        assert_eq!(frames.len(), 11);
        let last = frames.last().unwrap();
        assert_eq!(last.start, Duration::from_secs(1));
        assert_eq!(last.duration, Duration::from_millis(50));
    }

    #[test]
    fn per_step_takes_window_peak() {
        // 0.3 s at 1 kHz, 10 fps: windows of 100 samples.
        let mut samples = vec![0.0f32; 300];
        samples[10] = 0.2;
        samples[50] = -0.6;
        samples[199] = 0.1;
        samples[200] = 0.04;
        let signal = AudioSignal::mono(samples, 1_000).unwrap();
        let frames = EnvelopeExtractor::new(fps(10), EnvelopeStrategy::PerStep).extract(&signal);
        let values: Vec<f32> = frames.iter().map(|f| f.loudness).collect();
        assert_eq!(values, vec![0.6, 0.1, 0.04]);
    }

    #[test]
    fn per_step_considers_every_channel() {
        let mut samples = vec![0.0f32; 200];
        samples[101] = -0.9; // right channel, frame 50
        let signal = AudioSignal::new(samples, 1_000, 2).unwrap();
        let frames = EnvelopeExtractor::new(fps(10), EnvelopeStrategy::PerStep).extract(&signal);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].loudness, 0.9);
    }

    #[test]
    fn whole_clip_samples_step_start_at_analysis_rate() {
        // 0.25 s at 4 kHz, 10 fps: steps start at indices 0, 400 and 800.
        let mut samples = vec![0.0f32; 1_000];
        samples[0] = 0.3;
        samples[400] = -0.5;
        samples[401] = 0.9;
        samples[800] = 0.05;
        let signal = AudioSignal::mono(samples, 4_000).unwrap();
        let frames = EnvelopeExtractor::new(fps(10), whole_clip(4_000)).extract(&signal);
        let values: Vec<f32> = frames.iter().map(|f| f.loudness).collect();
        assert_eq!(values, vec![0.3, 0.5, 0.05]);
        assert_eq!(frames[2].duration, Duration::from_millis(50));
    }

    #[test]
    fn whole_clip_mixes_stereo_before_measuring() {
        let signal = AudioSignal::new(vec![0.8, -0.8, 0.4, 0.2], 4_000, 2).unwrap();
        let frames = EnvelopeExtractor::new(fps(10), whole_clip(4_000)).extract(&signal);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].loudness, 0.0);
    }

    #[test]
    fn whole_clip_resamples_silence_to_silence() {
        let signal = AudioSignal::mono(vec![0.0; 44_100], 44_100).unwrap();
        let frames = EnvelopeExtractor::new(fps(10), whole_clip(4_000)).extract(&signal);
        assert_eq!(frames.len(), 10);
        assert!(frames.iter().all(|f| f.loudness == 0.0));
    }

    #[test]
    fn whole_clip_resampled_burst_lands_on_the_right_steps() {
        // 1 s at 44.1 kHz, 0.5 between 0.25 s and 0.65 s, analysed at 4 kHz.
        let samples: Vec<f32> = (0..44_100)
            .map(|i| if (11_025..28_665).contains(&i) { 0.5 } else { 0.0 })
            .collect();
        let signal = AudioSignal::mono(samples, 44_100).unwrap();
        let frames = EnvelopeExtractor::new(fps(10), whole_clip(4_000)).extract(&signal);
        assert_eq!(frames.len(), 10);
        let loud: Vec<usize> = frames
            .iter()
            .filter(|f| f.loudness > 0.25)
            .map(|f| f.index)
            .collect();
        assert_eq!(loud, vec![3, 4, 5, 6]);
        for f in frames.iter().filter(|f| (3..=6).contains(&f.index)) {
            assert!((f.loudness - 0.5).abs() < 0.05, "step {} = {}", f.index, f.loudness);
        }
    }

    #[test]
    fn extraction_is_repeatable() {
        let samples: Vec<f32> = (0..22_050).map(|i| ((i as f32) * 0.013).sin() * 0.4).collect();
        let signal = AudioSignal::mono(samples, 22_050).unwrap();
        for strategy in [EnvelopeStrategy::PerStep, whole_clip(4_000)] {
            let extractor = EnvelopeExtractor::new(fps(10), strategy);
            assert_eq!(extractor.extract(&signal), extractor.extract(&signal));
        }
    }

    #[test]
    fn values_beyond_the_array_are_clamped_to_the_last_entry() {
        let frames = frames_from_values(&[0.1, 0.7], fps(10), Duration::from_millis(400));
        let values: Vec<f32> = frames.iter().map(|f| f.loudness).collect();
        assert_eq!(values, vec![0.1, 0.7, 0.7, 0.7]);
    }
}
