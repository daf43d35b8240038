use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed payload: {0}")]
    MalformedPayload(serde_json::Error),

    #[error("invalid report: {0}")]
    InvalidReport(String),

    #[error("invalid image encoding: {0}")]
    InvalidImageEncoding(base64::DecodeError),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("presence update failed: {0}")]
    PresenceUpdate(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel send error")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;
