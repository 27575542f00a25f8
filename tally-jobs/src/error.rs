#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("store `{0}`")]
    Store(#[from] tally_store::StoreError),

    #[error("arena `{0}`")]
    Arena(#[from] tally_arena::ArenaError),

    #[error("dependency `{name}` failed: {source}")]
    Dependency {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;
