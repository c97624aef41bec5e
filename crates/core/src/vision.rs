//! The face/affect classifier boundary.
//!
//! The engine never looks at pixels. A single webcam frame goes to an
//! external classifier which returns a dominant-emotion label; the engine
//! consumes the label only. Classifier failures degrade to a neutral result
//! so the capture loop on the client never sees an error.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::interviewer::retry_upstream;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Ok,
    NoFaceDetected,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub status: FrameStatus,
    pub dominant_emotion: String,
    #[serde(default)]
    pub emotion_scores: HashMap<String, f64>,
}

impl FrameAnalysis {
    /// The degraded result used whenever the classifier cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            status: FrameStatus::Unavailable,
            dominant_emotion: "neutral".to_string(),
            emotion_scores: HashMap::new(),
        }
    }
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait AffectClassifier: Send + Sync {
    /// Classifies one base64-encoded frame.
    async fn analyze_frame(&self, image_b64: &str) -> Result<FrameAnalysis>;
}

/// HTTP client for a sidecar classifier service.
pub struct RemoteAffectClassifier {
    client: Client,
    endpoint: String,
}

impl RemoteAffectClassifier {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl AffectClassifier for RemoteAffectClassifier {
    async fn analyze_frame(&self, image_b64: &str) -> Result<FrameAnalysis> {
        let body = serde_json::json!({ "image_b64": image_b64 });
        let analysis = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::UpstreamModel(e.to_string()))?
            .json::<FrameAnalysis>()
            .await
            .map_err(|e| EngineError::UpstreamModel(e.to_string()))?;
        Ok(analysis)
    }
}

/// Classifies a frame with the engine's retry budget, degrading to a neutral
/// "unavailable" result instead of surfacing the upstream error.
pub async fn classify_frame(
    classifier: &dyn AffectClassifier,
    cfg: &EngineConfig,
    image_b64: &str,
) -> FrameAnalysis {
    match retry_upstream(cfg, "affect classifier", || {
        classifier.analyze_frame(image_b64)
    })
    .await
    {
        Ok(analysis) => analysis,
        Err(e) => {
            tracing::warn!(error = %e, "affect classifier unavailable, degrading to neutral");
            FrameAnalysis::unavailable()
        }
    }
}
