use std::ops::Range;

use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::Engine;

/// Would a booking over `span` fit on this resource? Provisional
/// claims are not consulted: a claimed but uncommitted umbrella is free.
pub fn is_free(season: &Season, rs: &ResourceState, span: &Span) -> bool {
    validate_span(season, span).is_ok() && check_no_conflict(rs, span).is_ok()
}

impl Engine {
    /// Ids in `ids` where `span` could be booked, in ascending order.
    /// Each resource is locked on its own; no two locks are held at once.
    pub async fn available(&self, span: Span, ids: Range<ResourceId>) -> Vec<ResourceId> {
        let mut free = Vec::new();
        if validate_span(&self.season, &span).is_err() {
            return free;
        }
        for id in ids {
            match self.test_booking(id, span).await {
                Ok(true) => free.push(id),
                Ok(false) => {}
                Err(_) => break,
            }
        }
        free
    }

    /// Scan the whole grid.
    pub async fn available_all(&self, span: Span) -> Vec<ResourceId> {
        self.available(span, self.season.all()).await
    }

    /// Scan one grid row; `None` if the row is outside the grid.
    pub async fn available_in_row(&self, span: Span, row: u32) -> Option<Vec<ResourceId>> {
        let ids = self.season.row(row)?;
        Some(self.available(span, ids).await)
    }
}
