use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("unknown column \"{0}\"")]
    UnknownColumn(String),
    #[error("failed to render {path}: {message}")]
    Render { path: PathBuf, message: String },
}
