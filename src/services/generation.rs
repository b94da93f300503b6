use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::models::job::{FigurineStyle, ModelType};

/// Identifier for an in-flight provider task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
}

/// Outcome of a successful provider task: at least one mesh URL, an optional
/// preview thumbnail, and the raw provider payload kept for diagnostics.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub model_url: String,
    pub preview_url: Option<String>,
    pub provider_metadata: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("3D provider returned {status}: {body}")]
    Upstream { status: reqwest::StatusCode, body: String },

    /// Terminal FAILED/EXPIRED state reported by the provider.
    #[error("3D generation task failed: {0}")]
    Task(String),

    /// The bounded poll loop ran out of attempts. The caller holds a
    /// processing job and a deducted credit for the whole wait, so it must
    /// not block indefinitely.
    #[error("3D generation task timed out")]
    TimedOut,

    #[error("3D provider reported success but returned no model URL")]
    NoModelUrl,
}

/// Wraps the external image-to-3D provider: submit a task, poll it to a
/// terminal state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn submit(
        &self,
        image_url: &str,
        style: FigurineStyle,
        model_type: Option<ModelType>,
    ) -> Result<TaskHandle, GenerationError>;

    /// Poll every `interval` up to `max_attempts` times. Default cadence is
    /// 5 s x 60 attempts (a five-minute ceiling).
    async fn poll_until_done(
        &self,
        handle: &TaskHandle,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<TaskResult, GenerationError>;
}

/// Provider preset derived from the figurine style and, optionally, the
/// classified model type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StylePreset {
    pub topology: &'static str,
    pub target_polycount: u32,
    pub texture_prompt: Option<&'static str>,
}

/// Fixed style -> preset lookup. Head models get extra polygons for facial
/// detail regardless of style.
pub fn preset_for(style: FigurineStyle, model_type: Option<ModelType>) -> StylePreset {
    let mut preset = match style {
        FigurineStyle::Realistic => StylePreset {
            topology: "quad",
            target_polycount: 30_000,
            texture_prompt: None,
        },
        FigurineStyle::Anime => StylePreset {
            topology: "quad",
            target_polycount: 20_000,
            texture_prompt: Some("anime cel-shaded textures, clean flat colors, bold outlines"),
        },
        FigurineStyle::Lego => StylePreset {
            topology: "quad",
            target_polycount: 15_000,
            texture_prompt: Some("glossy molded plastic brick surfaces, bright primary colors"),
        },
        FigurineStyle::Fortnite => StylePreset {
            topology: "quad",
            target_polycount: 25_000,
            texture_prompt: Some(
                "stylized game character textures, vibrant saturated colors, soft gradients",
            ),
        },
    };

    if model_type == Some(ModelType::HeadModel) {
        preset.target_polycount = 50_000;
    }

    preset
}

/// Client for the Meshy image-to-3D API.
pub struct MeshyClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct CreateTaskResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    status: String,
    #[serde(default)]
    model_urls: Option<ModelUrls>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    task_error: Option<TaskErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ModelUrls {
    #[serde(default)]
    glb: Option<String>,
    #[serde(default)]
    obj: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl MeshyClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl GenerationGateway for MeshyClient {
    async fn submit(
        &self,
        image_url: &str,
        style: FigurineStyle,
        model_type: Option<ModelType>,
    ) -> Result<TaskHandle, GenerationError> {
        let preset = preset_for(style, model_type);
        let url = format!("{}/v2/image-to-3d", self.base_url);

        let mut body = serde_json::json!({
            "image_url": image_url,
            "enable_pbr": true,
            "ai_model": "meshy-4",
            "topology": preset.topology,
            "target_polycount": preset.target_polycount,
            "should_texture": true,
        });
        if let Some(prompt) = preset.texture_prompt {
            body["texture_prompt"] = serde_json::Value::String(prompt.to_string());
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "3D provider task creation failed");
            return Err(GenerationError::Upstream { status, body });
        }

        let created: CreateTaskResponse = response.json().await?;
        tracing::info!(task_id = %created.result, style = %style, "3D generation task created");

        Ok(TaskHandle { task_id: created.result })
    }

    async fn poll_until_done(
        &self,
        handle: &TaskHandle,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<TaskResult, GenerationError> {
        let url = format!("{}/v2/image-to-3d/{}", self.base_url, handle.task_id);

        for attempt in 1..=max_attempts {
            sleep(interval).await;

            let response = self.http.get(&url).bearer_auth(&self.api_key).send().await;

            // A failed status poll consumes the attempt and keeps going.
            let response = match response {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    tracing::warn!(task_id = %handle.task_id, status = %r.status(), attempt, "status poll failed");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(task_id = %handle.task_id, error = %e, attempt, "status poll failed");
                    continue;
                }
            };

            let raw: serde_json::Value = response.json().await?;
            let task: TaskStatusResponse = match serde_json::from_value(raw.clone()) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(task_id = %handle.task_id, error = %e, attempt, "unparseable status payload");
                    continue;
                }
            };

            tracing::debug!(task_id = %handle.task_id, status = %task.status, attempt, "task status");

            match task.status.as_str() {
                "SUCCEEDED" => {
                    let model_url = task
                        .model_urls
                        .and_then(|u| u.glb.or(u.obj))
                        .ok_or(GenerationError::NoModelUrl)?;
                    return Ok(TaskResult {
                        model_url,
                        preview_url: task.thumbnail_url,
                        provider_metadata: raw,
                    });
                }
                "FAILED" | "EXPIRED" => {
                    let reason = task
                        .task_error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(GenerationError::Task(reason));
                }
                // QUEUED / IN_PROGRESS
                _ => {}
            }
        }

        Err(GenerationError::TimedOut)
    }
}
