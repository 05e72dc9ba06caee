use spectacles_model::artifacts::DEFAULT_MODEL_PATH;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Demo server configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding X_columns.json, scaler.bin and frame_catalog.csv.
    pub data_dir: PathBuf,
    /// Trained regressor.
    pub model_path: PathBuf,
    /// Directory containing the ONNX face models.
    pub onnx_dir: PathBuf,
    pub bind: SocketAddr,
    /// Frames returned when a request does not ask for a count.
    pub top_k: usize,
}

impl Config {
    /// Load configuration from `SPECTACLES_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };

        let default_bind = SocketAddr::from(([127, 0, 0, 1], 7860));
        let bind = parse_or(&lookup, "SPECTACLES_BIND", default_bind);

        let top_k = match parse_or(&lookup, "SPECTACLES_TOP_K", 5usize) {
            0 => {
                tracing::warn!("SPECTACLES_TOP_K=0 is not allowed, using 5");
                5
            }
            k => k,
        };

        Self {
            data_dir: path("SPECTACLES_DATA_DIR", "data"),
            model_path: path("SPECTACLES_MODEL_PATH", DEFAULT_MODEL_PATH),
            onnx_dir: path("SPECTACLES_ONNX_DIR", "models"),
            bind,
            top_k,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparsable setting, using default");
            default
        }),
    }
}
