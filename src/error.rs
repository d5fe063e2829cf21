use thiserror::Error;

/// Pipeline conditions the experiment loop has to tell apart.
///
/// These travel inside `anyhow::Error` and are recovered with
/// `downcast_ref` where the grid decides whether to abort or skip.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A subject has more hourly rows than the data source allows
    #[error("subject {pid} has {count} time points, at most {max} are allowed")]
    TooManyTimePoints { pid: u64, count: usize, max: usize },

    /// Subjects do not share one input shape
    #[error("subject {pid} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        pid: u64,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// Feature subjects and label subjects are not aligned
    #[error("{features} feature subjects but {labels} label rows")]
    LabelMismatch { features: usize, labels: usize },

    /// Feature and label rows refer to different subjects
    #[error("subject #{index}: features belong to {feature_pid}, labels to {label_pid}")]
    UnalignedSubject {
        index: usize,
        feature_pid: u64,
        label_pid: u64,
    },

    /// A split ended up without samples
    #[error("{0} split is empty")]
    EmptySplit(&'static str),

    /// A trained model produced NaN or infinite scores
    #[error("{count} non-finite predictions for label {label}")]
    NonFinitePredictions { label: usize, count: usize },

    /// A configuration value could not be parsed
    #[error("invalid value {value:?} for option {option}")]
    InvalidOption { option: String, value: String },
}

impl PipelineError {
    /// Errors that signal corrupt input and must end the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::TooManyTimePoints { .. }
                | PipelineError::LabelMismatch { .. }
                | PipelineError::UnalignedSubject { .. }
        )
    }
}
