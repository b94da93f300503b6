use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for the sweeper.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// API key for the vision AI gateway
    pub vision_api_key: String,

    /// Base URL of the vision AI gateway (OpenAI-compatible chat endpoint)
    #[serde(default = "default_vision_base_url")]
    pub vision_base_url: String,

    /// Vision model identifier
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Meshy image-to-3D API key
    pub meshy_api_key: String,

    /// Meshy API base URL
    #[serde(default = "default_meshy_base_url")]
    pub meshy_base_url: String,

    /// Credits deducted per generation attempt
    #[serde(default = "default_generation_cost")]
    pub generation_cost: i64,

    /// Seconds between provider status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Poll attempts before a generation task is declared timed out
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// Minutes a processing job may go without an update before the sweeper
    /// cancels it
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_vision_base_url() -> String {
    "https://ai.gateway.lovable.dev".to_string()
}

fn default_vision_model() -> String {
    "google/gemini-2.5-flash".to_string()
}

fn default_meshy_base_url() -> String {
    "https://api.meshy.ai".to_string()
}

fn default_generation_cost() -> i64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_poll_max_attempts() -> u32 {
    60
}

fn default_stale_after_minutes() -> i64 {
    10
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
