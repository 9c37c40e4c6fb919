mod availability;
mod conflict;
mod error;

pub use availability::is_free;
pub use error::EngineError;

use tokio::sync::{Mutex, MutexGuard};

use crate::model::*;

use conflict::validate_span;

/// The resource table: one lock per umbrella, sized once from the season and
/// never resized, so indexing needs no lock of its own.
pub struct Engine {
    season: Season,
    resources: Vec<Mutex<ResourceState>>,
}

impl Engine {
    /// Empty table for `season`.
    pub fn new(season: Season) -> Self {
        let resources = (0..season.resource_count())
            .map(|_| Mutex::new(ResourceState::new()))
            .collect();
        Self { season, resources }
    }

    /// Table seeded from loaded state. Missing trailing entries start empty,
    /// extra entries are ignored.
    pub fn with_state(season: Season, states: Vec<ResourceState>) -> Self {
        let count = season.resource_count();
        let mut resources: Vec<Mutex<ResourceState>> =
            states.into_iter().take(count).map(Mutex::new).collect();
        resources.resize_with(count, || Mutex::new(ResourceState::new()));
        Self { season, resources }
    }

    pub fn season(&self) -> &Season {
        &self.season
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn resource(&self, id: ResourceId) -> Result<&Mutex<ResourceState>, EngineError> {
        self.resources.get(id).ok_or(EngineError::UnknownResource(id))
    }

    /// First phase of a reserve. Returns whether `user` now holds the claim.
    pub async fn acquire_lock(
        &self,
        id: ResourceId,
        user: UserId,
        today: Day,
    ) -> Result<bool, EngineError> {
        let mut guard = self.resource(id)?.lock().await;
        let granted = guard.try_claim(user, today);
        if !granted {
            metrics::counter!(crate::observability::CLAIMS_DENIED_TOTAL).increment(1);
        }
        Ok(granted)
    }

    /// Clear the claim regardless of who holds it.
    pub async fn release_lock(&self, id: ResourceId) -> Result<(), EngineError> {
        self.resource(id)?.lock().await.release_claim();
        Ok(())
    }

    /// Commit a reservation. Clears any claim on the resource on success.
    pub async fn book(&self, id: ResourceId, owner: UserId, span: Span) -> Result<(), EngineError> {
        let slot = self.resource(id)?;
        validate_span(&self.season, &span)?;
        slot.lock()
            .await
            .insert(owner, span)
            .map_err(EngineError::Overlap)?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        Ok(())
    }

    /// Non-mutating check on a single resource.
    pub async fn test_booking(&self, id: ResourceId, span: Span) -> Result<bool, EngineError> {
        let guard = self.resource(id)?.lock().await;
        Ok(is_free(&self.season, &guard, &span))
    }

    /// Remove every reservation `owner` holds on `id`. Idempotent.
    pub async fn cancel(&self, id: ResourceId, owner: UserId) -> Result<usize, EngineError> {
        Ok(self.resource(id)?.lock().await.remove_by_owner(owner))
    }

    /// Copy of every resource, taken one lock at a time in index order.
    pub async fn snapshot(&self) -> Vec<ResourceState> {
        let mut out = Vec::with_capacity(self.resources.len());
        for slot in &self.resources {
            out.push(slot.lock().await.clone());
        }
        out
    }

    /// Lock every resource in ascending index order and hold them all.
    /// Only the shutdown path does this; it must already hold the pool lock.
    pub async fn lock_all(&self) -> Vec<MutexGuard<'_, ResourceState>> {
        let mut guards = Vec::with_capacity(self.resources.len());
        for slot in &self.resources {
            guards.push(slot.lock().await);
        }
        guards
    }
}
