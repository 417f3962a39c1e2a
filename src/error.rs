use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuardError>;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Structural error ({key}): {message}")]
    Structural { key: String, message: String },

    #[error("Tree for {root} exceeded maximum depth {depth}")]
    DepthExceeded { root: String, depth: usize },

    #[error("Load error in {path}:{line}: {message}")]
    Load {
        path: String,
        line: usize,
        message: String,
    },

    #[error("No entity dump found in directory: {0}")]
    NoAdapter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    pub fn structural(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Structural {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        2
    }
}
