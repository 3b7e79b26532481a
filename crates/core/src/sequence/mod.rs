use crate::config::ConfigError;
use crate::envelope::LoudnessFrame;
use crate::threshold::Threshold;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MouthState {
    Open,
    Closed,
}

impl MouthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouthState::Open => "open",
            MouthState::Closed => "closed",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoseSpan {
    pub state: MouthState,
    pub start: Duration,
    pub duration: Duration,
}

/// Ordered, gapless pose sequence covering `[0, clip duration)`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoseTimeline {
    spans: Vec<PoseSpan>,
}

impl PoseTimeline {
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PoseSpan> {
        self.spans.iter()
    }

    pub fn total_duration(&self) -> Duration {
        self.spans.iter().map(|s| s.duration).sum()
    }

    /// Consecutive spans with the same state merged into one.
    pub fn runs(&self) -> Vec<PoseSpan> {
        let mut runs: Vec<PoseSpan> = Vec::new();
        for span in &self.spans {
            match runs.last_mut() {
                Some(last) if last.state == span.state => last.duration += span.duration,
                _ => runs.push(*span),
            }
        }
        runs
    }

    /// Fraction of spans showing the open mouth.
    pub fn open_ratio(&self) -> f32 {
        if self.spans.is_empty() {
            return 0.0;
        }
        let open = self
            .spans
            .iter()
            .filter(|s| s.state == MouthState::Open)
            .count();
        open as f32 / self.spans.len() as f32
    }
}

/// Post-classification smoothing. Off by default.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Smoothing {
    #[default]
    None,
    /// Starting closed, the pose only changes after `frames` consecutive
    /// frames disagree with it.
    Hysteresis { frames: u32 },
}

impl Smoothing {
    pub fn hysteresis(frames: u32) -> Result<Self, ConfigError> {
        if frames == 0 {
            return Err(ConfigError::ZeroHysteresis);
        }
        Ok(Self::Hysteresis { frames })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSequencer {
    smoothing: Smoothing,
}

impl FrameSequencer {
    pub fn new(smoothing: Smoothing) -> Self {
        Self { smoothing }
    }

    pub fn sequence(&self, frames: &[LoudnessFrame], threshold: Threshold) -> PoseTimeline {
        let raw = frames.iter().map(|f| {
            if threshold.is_voiced(f.loudness) {
                MouthState::Open
            } else {
                MouthState::Closed
            }
        });

        let states: Vec<MouthState> = match self.smoothing {
            Smoothing::None => raw.collect(),
            Smoothing::Hysteresis { frames: hold } => apply_hysteresis(raw, hold.max(1)),
        };

        let spans = frames
            .iter()
            .zip(states)
            .map(|(f, state)| PoseSpan {
                state,
                start: f.start,
                duration: f.duration,
            })
            .collect();
        PoseTimeline { spans }
    }
}

fn apply_hysteresis(raw: impl Iterator<Item = MouthState>, hold: u32) -> Vec<MouthState> {
    let mut current = MouthState::Closed;
    let mut disagreeing = 0u32;
    raw.map(|state| {
        if state == current {
            disagreeing = 0;
        } else {
            disagreeing += 1;
            if disagreeing >= hold {
                current = state;
                disagreeing = 0;
            }
        }
        current
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameRate;
    use crate::envelope::frames_from_values;
    use crate::threshold::{FixedThreshold, ThresholdPolicy};
    use MouthState::{Closed, Open};

    fn frames(values: &[f32]) -> Vec<LoudnessFrame> {
        frames_from_values(
            values,
            FrameRate::default(),
            Duration::from_millis(100 * values.len() as u64),
        )
    }

    fn fixed(v: f32) -> Threshold {
        FixedThreshold::new(v).unwrap().resolve(&[])
    }

    fn states(t: &PoseTimeline) -> Vec<MouthState> {
        t.iter().map(|s| s.state).collect()
    }

    #[test]
    fn one_second_clip_with_a_short_burst() {
        let f = frames(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.05, 0.05, 0.05, 0.0, 0.0]);
        let timeline = FrameSequencer::default().sequence(&f, fixed(0.03));

        assert_eq!(
            states(&timeline),
            vec![Closed, Closed, Closed, Closed, Closed, Open, Open, Open, Closed, Closed]
        );
        assert!(timeline
            .iter()
            .all(|s| s.duration == Duration::from_millis(100)));
        assert_eq!(timeline.total_duration(), Duration::from_secs(1));

        let runs = timeline.runs();
        assert_eq!(runs.len(), 3);
        assert_eq!((runs[0].state, runs[0].duration), (Closed, Duration::from_millis(500)));
        assert_eq!((runs[1].state, runs[1].duration), (Open, Duration::from_millis(300)));
        assert_eq!(runs[1].start, Duration::from_millis(500));
        assert_eq!((runs[2].state, runs[2].duration), (Closed, Duration::from_millis(200)));
    }

    #[test]
    fn silence_is_always_closed() {
        let timeline = FrameSequencer::default().sequence(&frames(&[0.0; 12]), fixed(0.01));
        assert!(timeline.iter().all(|s| s.state == Closed));
        assert_eq!(timeline.open_ratio(), 0.0);
    }

    #[test]
    fn full_scale_is_always_open() {
        let timeline = FrameSequencer::default().sequence(&frames(&[1.0; 7]), fixed(0.99));
        assert!(timeline.iter().all(|s| s.state == Open));
        assert_eq!(timeline.open_ratio(), 1.0);
    }

    #[test]
    fn loudness_equal_to_threshold_stays_closed() {
        let timeline = FrameSequencer::default().sequence(&frames(&[0.03]), fixed(0.03));
        assert_eq!(states(&timeline), vec![Closed]);
    }

    #[test]
    fn empty_frames_give_empty_timeline() {
        let timeline = FrameSequencer::default().sequence(&[], fixed(0.03));
        assert!(timeline.is_empty());
        assert_eq!(timeline.total_duration(), Duration::ZERO);
        assert!(timeline.runs().is_empty());
    }

    #[test]
    fn hysteresis_of_one_matches_baseline() {
        let f = frames(&[0.5, 0.0, 0.5, 0.5, 0.0, 0.0, 0.5]);
        let baseline = FrameSequencer::default().sequence(&f, fixed(0.1));
        let smoothed = FrameSequencer::new(Smoothing::hysteresis(1).unwrap()).sequence(&f, fixed(0.1));
        assert_eq!(baseline, smoothed);
    }

    #[test]
    fn hysteresis_suppresses_single_frame_flicker() {
        let f = frames(&[0.5, 0.0, 0.5, 0.5, 0.5, 0.0, 0.5, 0.0, 0.0]);
        let timeline = FrameSequencer::new(Smoothing::hysteresis(2).unwrap()).sequence(&f, fixed(0.1));
        assert_eq!(
            states(&timeline),
            vec![Closed, Closed, Closed, Open, Open, Open, Open, Open, Closed]
        );
        assert_eq!(timeline.total_duration(), Duration::from_millis(900));
    }

    #[test]
    fn zero_frame_hysteresis_is_rejected() {
        assert_eq!(Smoothing::hysteresis(0), Err(ConfigError::ZeroHysteresis));
    }

    #[test]
    fn timeline_serializes_lowercase_states() {
        let timeline = FrameSequencer::default().sequence(&frames(&[0.5]), fixed(0.1));
        let json = serde_json::to_string(&timeline).unwrap();
        assert!(json.contains("\"open\""));
    }
}
