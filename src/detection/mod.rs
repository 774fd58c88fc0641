//! Detection evaluator: score vector → confidence percent → band decision.

pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{ScoreVector, SoundId};
use crate::config::SoundConfig;
use crate::metrics::{metric_names, MetricsRegistry};

/// target / (target + background) · 100, or 0 when both scores are zero.
pub fn confidence_percent(scores: ScoreVector) -> f64 {
    let target = f64::from(scores.target);
    let sum = target + f64::from(scores.background);
    if sum > 0.0 {
        (target / sum * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Closed confidence interval, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceBand {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BandPosition {
    Below,
    Within,
    Above,
}

impl AcceptanceBand {
    pub fn position(&self, confidence: f64) -> BandPosition {
        if confidence < self.low {
            BandPosition::Below
        } else if confidence > self.high {
            BandPosition::Above
        } else {
            BandPosition::Within
        }
    }

    pub fn contains(&self, confidence: f64) -> bool {
        self.position(confidence) == BandPosition::Within
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.low.is_finite() || !self.high.is_finite() {
            return Err("band bounds must be finite".into());
        }
        if self.low < 0.0 || self.high > 100.0 {
            return Err(format!("band [{}, {}] outside [0, 100]", self.low, self.high));
        }
        if self.low > self.high {
            return Err(format!("band low {} above high {}", self.low, self.high));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub sound_id: SoundId,
    pub confidence_percent: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-sound snapshot of the most recent evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundStatus {
    pub sound_id: SoundId,
    pub windows: u64,
    pub last_confidence: Option<f64>,
    /// `None` for sounds without a band.
    pub position: Option<BandPosition>,
    pub last_detected: Option<DateTime<Utc>>,
}

impl SoundStatus {
    fn new(sound_id: SoundId) -> Self {
        Self {
            sound_id,
            windows: 0,
            last_confidence: None,
            position: None,
            last_detected: None,
        }
    }
}

pub struct DetectionEvaluator {
    bands: HashMap<SoundId, Option<AcceptanceBand>>,
    status: RwLock<HashMap<SoundId, SoundStatus>>,
    metrics: Arc<MetricsRegistry>,
}

impl DetectionEvaluator {
    pub fn new(sounds: &[SoundConfig], metrics: Arc<MetricsRegistry>) -> Self {
        let bands = sounds.iter().map(|s| (s.id, s.band)).collect();
        let status = sounds
            .iter()
            .map(|s| (s.id, SoundStatus::new(s.id)))
            .collect();
        Self {
            bands,
            status: RwLock::new(status),
            metrics,
        }
    }

    /// A `DetectionEvent` when the window's confidence falls inside the
    /// sound's band. Sounds without a band only update their status.
    pub fn evaluate(
        &self,
        sound_id: SoundId,
        scores: ScoreVector,
        at: DateTime<Utc>,
    ) -> Option<DetectionEvent> {
        let Some(band) = self.bands.get(&sound_id) else {
            debug!(sound = %sound_id, "score for untracked sound ignored");
            return None;
        };
        let confidence = confidence_percent(scores);
        self.metrics.record(metric_names::DETECTION_CONFIDENCE, confidence);

        let position = band.map(|b| b.position(confidence));
        let detected = position == Some(BandPosition::Within);

        {
            let mut status = self.status.write();
            let entry = status
                .entry(sound_id)
                .or_insert_with(|| SoundStatus::new(sound_id));
            entry.windows += 1;
            entry.last_confidence = Some(confidence);
            entry.position = position;
            if detected {
                entry.last_detected = Some(at);
            }
        }

        if !detected {
            return None;
        }
        info!(sound = %sound_id, confidence, "sound_detected");
        Some(DetectionEvent {
            sound_id,
            confidence_percent: confidence,
            timestamp: at,
        })
    }

    pub fn status(&self) -> Vec<SoundStatus> {
        let mut all: Vec<SoundStatus> = self.status.read().values().cloned().collect();
        all.sort_by_key(|s| s.sound_id);
        all
    }

    pub fn status_of(&self, sound_id: SoundId) -> Option<SoundStatus> {
        self.status.read().get(&sound_id).cloned()
    }
}
