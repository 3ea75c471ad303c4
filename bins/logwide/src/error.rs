#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Engine(#[from] logwide_engine::EngineError),

    #[error("input '{path}': {source}")]
    Input {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{failed} of {total} events failed")]
    Failed { failed: usize, total: usize },
}
