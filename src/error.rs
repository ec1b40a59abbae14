use thiserror::Error;

/// Application-level error carrying the process exit code.
///
/// Exit codes:
/// - 2: input / IO problems
/// - 3: insufficient data
/// - 4: fit failure
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Reason a single sweep could not be fitted.
///
/// Returned by the numeric core instead of zero-filling; the caller decides
/// whether to abort or quarantine the sweep and continue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("sweep has {found} points, need at least {required}")]
    TooFewPoints { found: usize, required: usize },

    #[error("frequency and data lengths differ ({freq} vs {data})")]
    LengthMismatch { freq: usize, data: usize },

    #[error("non-finite value at index {index}")]
    NonFinite { index: usize },

    #[error("frequency is not strictly increasing at index {index}")]
    NonMonotonicFrequency { index: usize },

    #[error("circle fit is degenerate (r0 = {radius})")]
    DegenerateCircle { radius: f64 },

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl FitError {
    /// Exit code used when a fit error terminates the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::TooFewPoints { .. } => 3,
            FitError::LengthMismatch { .. }
            | FitError::NonFinite { .. }
            | FitError::NonMonotonicFrequency { .. }
            | FitError::InvalidOption(_) => 2,
            FitError::DegenerateCircle { .. } => 4,
        }
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}
