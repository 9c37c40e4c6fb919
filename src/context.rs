use std::io;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, MutexGuard};

use crate::calendar::Clock;
use crate::engine::Engine;
use crate::model::{Day, ResourceState, Season};
use crate::persist::{Database, PersistError};
use crate::pool::ConnectionPool;

/// Everything the acceptor, the sessions and shutdown share. Built once at
/// startup and handed around behind an `Arc`.
pub struct Context {
    pub engine: Engine,
    pub pool: ConnectionPool,
    pub database: Database,
    clock: Arc<dyn Clock>,
    /// Held for a whole snapshot-and-write; every flush shares one temp file.
    flush: Mutex<()>,
}

impl Context {
    pub fn new(
        engine: Engine,
        pool: ConnectionPool,
        database: Database,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { engine, pool, database, clock, flush: Mutex::new(()) }
    }

    /// Build the table from whatever `database` holds for `season`.
    pub fn load(
        season: Season,
        database: Database,
        max_connections: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PersistError> {
        let states: Vec<ResourceState> = database.load(&season)?;
        let engine = Engine::with_state(season, states);
        Ok(Self::new(engine, ConnectionPool::new(max_connections), database, clock))
    }

    pub fn season(&self) -> &Season {
        self.engine.season()
    }

    pub fn today(&self) -> Day {
        self.clock.today()
    }

    /// Exclusive right to write the database. Taken before any pool or
    /// resource lock.
    pub async fn lock_flush(&self) -> MutexGuard<'_, ()> {
        self.flush.lock().await
    }

    /// Snapshot the table one resource at a time and write it out.
    pub async fn save(&self, trigger: &'static str) -> io::Result<()> {
        let _flush = self.lock_flush().await;
        let started = Instant::now();
        let snapshot = self.engine.snapshot().await;
        let database = self.database.clone();
        tokio::task::spawn_blocking(move || database.save(&snapshot))
            .await
            .map_err(io::Error::other)??;
        metrics::counter!(crate::observability::SAVES_TOTAL, "trigger" => trigger).increment(1);
        metrics::histogram!(crate::observability::SAVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }
}
