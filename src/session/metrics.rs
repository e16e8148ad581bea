//! Chant metrics record

use std::collections::VecDeque;

/// Samples kept for evaluation
pub(crate) const HISTORY_LIMIT: usize = 50;

/// Loudness and text gathered during a chant session
///
/// Every update returns a new value built from the previous one.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ChantMetrics {
    pub(crate) current_volume: f32,
    /// Highest sample of the session; survives capture-window resets
    pub(crate) max_volume: f32,
    pub(crate) history: VecDeque<f32>,
    pub(crate) transcript: String,
    pub(crate) remote_average: Option<f64>,
    pub(crate) prompt: String,
}

impl ChantMetrics {
    pub(crate) fn with_sample(&self, value: f32) -> Self {
        let value = value.clamp(0.0, 1.0);
        let mut history = self.history.clone();
        history.push_back(value);
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        Self {
            current_volume: value,
            max_volume: self.max_volume.max(value),
            history,
            ..self.clone()
        }
    }

    /// Start of a capture window: volume and history cleared
    pub(crate) fn reset_window(&self) -> Self {
        Self {
            current_volume: 0.0,
            history: VecDeque::new(),
            transcript: String::new(),
            ..self.clone()
        }
    }

    pub(crate) fn released(&self) -> Self {
        Self {
            current_volume: 0.0,
            ..self.clone()
        }
    }

    pub(crate) fn with_transcript(&self, transcript: String) -> Self {
        Self {
            transcript,
            ..self.clone()
        }
    }

    pub(crate) fn with_remote_average(&self, average: f64) -> Self {
        Self {
            remote_average: Some(average),
            ..self.clone()
        }
    }

    pub(crate) fn with_prompt(&self, prompt: String) -> Self {
        Self {
            prompt,
            ..self.clone()
        }
    }

    /// Mean of the window's samples; an empty window averages to zero
    pub(crate) fn mean_volume(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f32>() / self.history.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded_oldest_first() {
        let mut metrics = ChantMetrics::default();
        for i in 0..120 {
            metrics = metrics.with_sample(i as f32 / 200.0);
            assert!(metrics.history.len() <= HISTORY_LIMIT);
        }
        assert_eq!(metrics.history.len(), HISTORY_LIMIT);
        assert_eq!(metrics.history.front().copied(), Some(70.0 / 200.0));
        assert_eq!(metrics.history.back().copied(), Some(119.0 / 200.0));
    }

    #[test]
    fn test_max_volume_survives_window_reset() {
        let metrics = ChantMetrics::default()
            .with_sample(0.8)
            .with_sample(0.3)
            .reset_window();
        assert_eq!(metrics.max_volume, 0.8);
        assert_eq!(metrics.current_volume, 0.0);
        assert!(metrics.history.is_empty());

        let metrics = metrics.with_sample(0.2);
        assert_eq!(metrics.max_volume, 0.8);
    }

    #[test]
    fn test_samples_are_clamped() {
        let metrics = ChantMetrics::default().with_sample(1.7).with_sample(-0.2);
        assert_eq!(metrics.max_volume, 1.0);
        assert_eq!(metrics.current_volume, 0.0);
    }

    #[test]
    fn test_mean_volume() {
        let metrics = [0.1, 0.9, 0.9, 0.9]
            .into_iter()
            .fold(ChantMetrics::default(), |m, v| m.with_sample(v));
        assert!((metrics.mean_volume() - 0.7).abs() < 1e-6);
        assert_eq!(ChantMetrics::default().mean_volume(), 0.0);
    }

    #[test]
    fn test_release_zeroes_current_only() {
        let metrics = ChantMetrics::default().with_sample(0.6).released();
        assert_eq!(metrics.current_volume, 0.0);
        assert_eq!(metrics.history.len(), 1);
    }
}
