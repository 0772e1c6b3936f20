use std::error::Error;
use std::fmt;

/// Failures raised by the model factory before anything is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryError {
    /// The `model` selector does not name a supported architecture.
    UnknownModel(String),
    /// The `mode`/`model` pair has no multi-task builder.
    UnknownModeModel { mode: Option<String>, model: String },
}

impl fmt::Display for FactoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FactoryError::UnknownModel(name) => write!(f, "wrong model name: {}", name),
            FactoryError::UnknownModeModel { mode, model } => write!(
                f,
                "wrong model or mode name: mode={}, model={}",
                mode.as_deref().unwrap_or("<none>"),
                model
            ),
        }
    }
}

impl Error for FactoryError {}
