use crate::model::*;

use super::EngineError;

/// A range is bookable only if it is ordered and lies inside the season.
pub(crate) fn validate_span(season: &Season, span: &Span) -> Result<(), EngineError> {
    if !span.is_ordered() || !season.span().contains_span(span) {
        return Err(EngineError::InvalidRange(*span));
    }
    Ok(())
}

pub(crate) fn check_no_conflict(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    if rs.overlaps(span) {
        return Err(EngineError::Overlap(*span));
    }
    Ok(())
}
