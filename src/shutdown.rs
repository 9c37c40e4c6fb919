use std::io;
use std::time::Instant;

use tracing::info;

use crate::context::Context;
use crate::model::ResourceState;

/// Stop every session and flush the table.
///
/// Takes the flush lock, then the pool lock, then every resource lock in
/// ascending order, so no session can be admitted or mutate state and no
/// other flush can run while the snapshot is written. Active transports are
/// cancelled and later acquisitions fail. Returns how many sessions were
/// closed.
pub async fn drain_and_persist(ctx: &Context) -> io::Result<usize> {
    let _flush = ctx.lock_flush().await;
    let started = Instant::now();
    let mut pool = ctx.pool.lock().await;
    let guards = ctx.engine.lock_all().await;

    let closed = pool.close_all();
    info!("closed {closed} active sessions");

    let snapshot: Vec<ResourceState> = guards.iter().map(|g| (**g).clone()).collect();
    let database = ctx.database.clone();
    let result = tokio::task::spawn_blocking(move || database.save(&snapshot))
        .await
        .map_err(io::Error::other)
        .and_then(|r| r);
    if result.is_ok() {
        metrics::counter!(crate::observability::SAVES_TOTAL, "trigger" => "shutdown").increment(1);
        metrics::histogram!(crate::observability::SAVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        info!("database written to {}", ctx.database.path().display());
    }
    drop(guards);
    drop(pool);
    result.map(|()| closed)
}
