use std::fmt;

/// Internal invariant failures raised by the engine itself.
///
/// These are never intercepted inside the engine: a `MalformedPlan` or an
/// `IllegalPlanState` means the caller built something the plan graph does not
/// allow, and a `ShapeGeneration` failure means the frame-shape registry could
/// not materialize a layout. Failures raised by invoked targets are *not*
/// represented here; they travel as the target's own `anyhow::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    MalformedPlan(String),
    IllegalPlanState(String),
    ShapeGeneration { signature: String, reason: String },
    UnresolvedSymbol(String),
}

impl EngineError {
    pub fn malformed(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(EngineError::MalformedPlan(msg.into()))
    }

    pub fn illegal_state(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(EngineError::IllegalPlanState(msg.into()))
    }

    pub fn shape(signature: &str, reason: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(EngineError::ShapeGeneration {
            signature: signature.to_string(),
            reason: reason.into(),
        })
    }

    pub fn unresolved(key: &str) -> anyhow::Error {
        anyhow::Error::new(EngineError::UnresolvedSymbol(key.to_string()))
    }

    /// Returns the engine error carried by `err`, if any.
    pub fn of(err: &anyhow::Error) -> Option<&EngineError> {
        err.downcast_ref::<EngineError>()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MalformedPlan(msg) => write!(f, "malformed call plan: {}", msg),
            EngineError::IllegalPlanState(msg) => write!(f, "illegal plan state: {}", msg),
            EngineError::ShapeGeneration { signature, reason } => {
                write!(f, "cannot generate frame shape \"{}\": {}", signature, reason)
            }
            EngineError::UnresolvedSymbol(key) => write!(f, "unresolved symbol: {}", key),
        }
    }
}

impl std::error::Error for EngineError {}
