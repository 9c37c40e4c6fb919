use crate::model::{ResourceId, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    UnknownResource(ResourceId),
    InvalidRange(Span),
    Overlap(Span),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnknownResource(id) => write!(f, "unknown resource: {id}"),
            EngineError::InvalidRange(span) => {
                write!(f, "invalid range [{}, {}]", span.start, span.end)
            }
            EngineError::Overlap(span) => write!(
                f,
                "range [{}, {}] overlaps an existing reservation",
                span.start, span.end
            ),
        }
    }
}

impl std::error::Error for EngineError {}
