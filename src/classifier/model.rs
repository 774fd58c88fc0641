//! Model sources and the score layout read from `metadata.json`.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::ClassifierError;

/// Base URL of a hosted model; `model.json` and `metadata.json` sit beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    base_url: String,
}

impl ModelSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model_url(&self) -> String {
        format!("{}model.json", self.base_url)
    }

    pub fn metadata_url(&self) -> String {
        format!("{}metadata.json", self.base_url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    #[serde(rename = "wordLabels", default)]
    pub word_labels: Vec<String>,
}

/// Where the background and target classes sit in the raw score array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreLayout {
    pub background_index: usize,
    pub target_index: usize,
}

impl Default for ScoreLayout {
    fn default() -> Self {
        Self {
            background_index: 0,
            target_index: 1,
        }
    }
}

impl ScoreLayout {
    /// A label containing "background" is the background class; the first
    /// other label is the target. Returns `None` when either is missing.
    pub fn from_labels(labels: &[String]) -> Option<Self> {
        let background_index = labels
            .iter()
            .position(|l| l.to_ascii_lowercase().contains("background"))?;
        let target_index = (0..labels.len()).find(|&i| i != background_index)?;
        Some(Self {
            background_index,
            target_index,
        })
    }

    pub fn required_len(&self) -> usize {
        self.background_index.max(self.target_index) + 1
    }
}

/// Fetches `metadata.json` for hosted models.
pub struct MetadataClient {
    http: reqwest::Client,
}

impl MetadataClient {
    pub fn new(timeout: Duration) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Metadata(e.to_string()))?;
        Ok(Self { http })
    }

    pub async fn fetch(&self, source: &ModelSource) -> Result<ModelMetadata, ClassifierError> {
        let url = source.metadata_url();
        debug!(url = %url, "fetching model metadata");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClassifierError::Metadata(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Metadata(format!("HTTP {status} for {url}")));
        }

        response
            .json::<ModelMetadata>()
            .await
            .map_err(|e| ClassifierError::Metadata(format!("parse {url}: {e}")))
    }

    pub async fn fetch_layout(&self, source: &ModelSource) -> Result<ScoreLayout, ClassifierError> {
        let metadata = self.fetch(source).await?;
        ScoreLayout::from_labels(&metadata.word_labels).ok_or_else(|| {
            ClassifierError::Metadata(format!(
                "no background/target labels in {:?}",
                metadata.word_labels
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_model_urls() {
        let source = ModelSource::new("https://teachablemachine.withgoogle.com/models/HMHHWzV40");
        assert_eq!(
            source.model_url(),
            "https://teachablemachine.withgoogle.com/models/HMHHWzV40/model.json"
        );
        assert!(source.metadata_url().ends_with("/HMHHWzV40/metadata.json"));
    }

    #[test]
    fn test_layout_from_labels() {
        let layout = ScoreLayout::from_labels(&labels(&["Background Noise", "Water"])).unwrap();
        assert_eq!(layout, ScoreLayout::default());

        let swapped = ScoreLayout::from_labels(&labels(&["Door Lock", "_background_noise_"])).unwrap();
        assert_eq!(swapped.background_index, 1);
        assert_eq!(swapped.target_index, 0);
        assert_eq!(swapped.required_len(), 2);
    }

    #[test]
    fn test_layout_needs_both_classes() {
        assert!(ScoreLayout::from_labels(&labels(&["Water", "Door"])).is_none());
        assert!(ScoreLayout::from_labels(&labels(&["Background Noise"])).is_none());
    }

    #[test]
    fn test_metadata_parse() {
        let metadata: ModelMetadata = serde_json::from_str(
            r#"{"tfjsSpeechCommandsVersion":"0.4.0","modelName":"tm-my-audio-model","wordLabels":["Background Noise","Water"]}"#,
        )
        .unwrap();
        assert_eq!(metadata.word_labels.len(), 2);
    }
}
