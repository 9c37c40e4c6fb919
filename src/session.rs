use std::sync::Arc;

use tracing::{debug, warn};

use crate::calendar::{format_day, parse_date};
use crate::context::Context;
use crate::model::*;
use crate::protocol::{Command, Reply, Verb};

/// Sub-state of a logged-in session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A bare `book` was accepted; waiting for `book <resourceId>`.
    Choosing,
    /// Holding the provisional claim on a resource; waiting for commit or cancel.
    Reserving(ResourceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Anonymous,
    LoggedIn { user: UserId, phase: Phase },
}

/// Per-connection protocol state. Owned by the connection task.
pub struct Session {
    ctx: Arc<Context>,
    state: State,
}

impl Session {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx, state: State::Anonymous }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Apply one command and produce the reply to send back.
    pub async fn handle(&mut self, cmd: &Command) -> Reply {
        metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => cmd.verb.label())
            .increment(1);
        match self.state {
            State::Anonymous => self.login(cmd),
            State::LoggedIn { user, phase } => {
                let (reply, next) = match phase {
                    Phase::Idle => self.idle(user, cmd).await,
                    Phase::Choosing => self.choosing(user, cmd).await,
                    Phase::Reserving(id) => self.reserving(user, id, cmd).await,
                };
                debug!("user {user}: {} {:?} -> {reply} ({next:?})", cmd.verb.label(), cmd.args);
                self.state = State::LoggedIn { user, phase: next };
                reply
            }
        }
    }

    fn login(&mut self, cmd: &Command) -> Reply {
        if cmd.verb != Verb::Login || cmd.arity() != 1 {
            return Reply::NotLoggedIn;
        }
        match cmd.arg(0).and_then(|s| s.parse::<UserId>().ok()) {
            Some(user) if user != 0 => {
                debug!("login as user {user}");
                self.state = State::LoggedIn { user, phase: Phase::Idle };
                Reply::Ok
            }
            _ => Reply::NotLoggedIn,
        }
    }

    async fn idle(&self, user: UserId, cmd: &Command) -> (Reply, Phase) {
        let reply = match (&cmd.verb, cmd.arity()) {
            (Verb::Book, 0) => return (Reply::Ok, Phase::Choosing),
            (Verb::Book, 1) => return self.claim(user, &cmd.args[0]).await,
            (Verb::Available, 0..=2) => match self.requested_span(&cmd.args) {
                Some(span) => Reply::free_list(self.ctx.engine.available_all(span).await),
                None => Reply::NotAvailable,
            },
            (Verb::AvailRow, 1..=3) => self.available_in_row(&cmd.args).await,
            (Verb::Cancel, 1) => match cmd.args[0].parse::<ResourceId>() {
                Ok(id) => match self.ctx.engine.cancel(id, user).await {
                    Ok(_) => Reply::CancelOk,
                    Err(_) => Reply::Failed,
                },
                Err(_) => Reply::Failed,
            },
            (Verb::Logout, 0) => Reply::Bye,
            (Verb::Save, 0) => match self.ctx.save("command").await {
                Ok(()) => Reply::Ok,
                Err(e) => {
                    warn!("save requested by user {user} failed: {e}");
                    Reply::Failed
                }
            },
            (Verb::Today, 0) => self.date(self.ctx.today()),
            (Verb::Start, 0) => self.date(self.ctx.season().start),
            (Verb::End, 0) => self.date(self.ctx.season().end),
            (Verb::Unknown(_), _) => Reply::Unknown,
            // known verb with the wrong arity, or `login` after logging in
            _ => Reply::Failed,
        };
        (reply, Phase::Idle)
    }

    async fn choosing(&self, user: UserId, cmd: &Command) -> (Reply, Phase) {
        match (&cmd.verb, cmd.arity()) {
            (Verb::Book, 1) => self.claim(user, &cmd.args[0]).await,
            _ => (Reply::Failed, Phase::Idle),
        }
    }

    /// Commit or abandon the claim on `id`. Any other input drops back to
    /// idle but leaves the claim in place; it then lapses only when the same
    /// user claims again or the day changes.
    async fn reserving(&self, user: UserId, id: ResourceId, cmd: &Command) -> (Reply, Phase) {
        match (&cmd.verb, cmd.arity()) {
            (Verb::Book, 1..=3) => {
                let (repeated_id, dates) = split_commit_args(&cmd.args);
                if let Some(tok) = repeated_id
                    && tok.parse::<ResourceId>() != Ok(id)
                {
                    return (Reply::Failed, Phase::Idle);
                }
                let booked = match self.requested_span(dates) {
                    Some(span) => self.ctx.engine.book(id, user, span).await.is_ok(),
                    None => false,
                };
                if booked {
                    (Reply::Done, Phase::Idle)
                } else {
                    let _ = self.ctx.engine.release_lock(id).await;
                    (Reply::NotAvailable, Phase::Idle)
                }
            }
            (Verb::Cancel, 0) => {
                let _ = self.ctx.engine.release_lock(id).await;
                (Reply::Ok, Phase::Idle)
            }
            _ => (Reply::Failed, Phase::Idle),
        }
    }

    async fn claim(&self, user: UserId, token: &str) -> (Reply, Phase) {
        let Ok(id) = token.parse::<ResourceId>() else {
            return (Reply::Failed, Phase::Idle);
        };
        match self.ctx.engine.acquire_lock(id, user, self.ctx.today()).await {
            Ok(true) => (Reply::Available, Phase::Reserving(id)),
            Ok(false) | Err(_) => (Reply::NotAvailable, Phase::Idle),
        }
    }

    async fn available_in_row(&self, args: &[String]) -> Reply {
        let Ok(row) = args[0].parse::<u32>() else {
            return Reply::Failed;
        };
        let Some(span) = self.requested_span(&args[1..]) else {
            return Reply::NotAvailable;
        };
        match self.ctx.engine.available_in_row(span, row).await {
            Some(ids) => Reply::free_list(ids),
            None => Reply::NotAvailable,
        }
    }

    /// No dates: today only. One date: today through it. Two: the range.
    /// `None` if a date does not parse or is not in the season year.
    fn requested_span(&self, dates: &[String]) -> Option<Span> {
        let year = Some(self.ctx.season().year);
        let today = self.ctx.today();
        match dates {
            [] => Some(Span::single(today)),
            [end] => Some(Span::new(today, parse_date(end, year)?)),
            [start, end] => Some(Span::new(parse_date(start, year)?, parse_date(end, year)?)),
            _ => None,
        }
    }

    fn date(&self, day: Day) -> Reply {
        format_day(self.ctx.season().year, day).map_or(Reply::Failed, Reply::Date)
    }
}

/// Commit arguments may repeat the resource id in front of the dates
/// (`book <id> <end>`, `book <id> <start> <end>`). Dates always contain `/`.
fn split_commit_args(args: &[String]) -> (Option<&str>, &[String]) {
    match args {
        [id, rest @ ..] if args.len() == 3 || (args.len() == 2 && !id.contains('/')) => {
            (Some(id.as_str()), rest)
        }
        _ => (None, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::calendar::ManualClock;
    use crate::engine::Engine;
    use crate::persist::Database;
    use crate::pool::ConnectionPool;

    // 05/06/2020
    const TODAY: Day = 156;

    fn context(name: &str) -> (Arc<Context>, Arc<ManualClock>) {
        let dir = std::env::temp_dir().join("lido_test_session");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        let season = Season { rows: 2, cols: 5, year: 2020, start: 152, end: 273 };
        let clock = Arc::new(ManualClock::new(TODAY));
        let ctx = Context::new(
            Engine::new(season),
            ConnectionPool::new(4),
            Database::new(path),
            clock.clone(),
        );
        (Arc::new(ctx), clock)
    }

    async fn send(session: &mut Session, line: &str) -> String {
        let cmd = Command::parse(line).unwrap();
        session.handle(&cmd).await.to_string()
    }

    async fn logged_in(ctx: &Arc<Context>, user: UserId) -> Session {
        let mut s = Session::new(ctx.clone());
        assert_eq!(send(&mut s, &format!("login {user}")).await, "ok");
        s
    }

    #[tokio::test]
    async fn requires_login_first() {
        let (ctx, _) = context("login.data");
        let mut s = Session::new(ctx);
        assert_eq!(send(&mut s, "book").await, "nlogin");
        assert_eq!(send(&mut s, "login").await, "nlogin");
        assert_eq!(send(&mut s, "login 0").await, "nlogin");
        assert_eq!(send(&mut s, "login bob").await, "nlogin");
        assert_eq!(s.state(), State::Anonymous);
        assert_eq!(send(&mut s, "login 7").await, "ok");
        assert_eq!(s.state(), State::LoggedIn { user: 7, phase: Phase::Idle });
        assert_eq!(send(&mut s, "login 8").await, "failed");
        assert_eq!(s.state(), State::LoggedIn { user: 7, phase: Phase::Idle });
    }

    #[tokio::test]
    async fn end_to_end_booking_hides_resource() {
        let (ctx, _) = context("e2e.data");
        let mut a = logged_in(&ctx, 7).await;
        assert_eq!(send(&mut a, "book").await, "ok");
        assert_eq!(send(&mut a, "book 3").await, "available");
        assert_eq!(a.state(), State::LoggedIn { user: 7, phase: Phase::Reserving(3) });
        assert_eq!(send(&mut a, "book 10/06/2020 12/06/2020").await, "done");
        assert_eq!(a.state(), State::LoggedIn { user: 7, phase: Phase::Idle });

        let mut b = logged_in(&ctx, 8).await;
        assert_eq!(
            send(&mut b, "available 10/06/2020 12/06/2020").await,
            "available 0 1 2 4 5 6 7 8 9"
        );
        assert_eq!(
            send(&mut b, "availrow 0 11/06/2020 11/06/2020").await,
            "available 0 1 2 4"
        );
        assert_eq!(
            send(&mut b, "availrow 1 11/06/2020 11/06/2020").await,
            "available 5 6 7 8 9"
        );
    }

    #[tokio::test]
    async fn second_user_is_refused_the_claim() {
        let (ctx, _) = context("contend.data");
        let mut a = logged_in(&ctx, 1).await;
        let mut b = logged_in(&ctx, 2).await;
        assert_eq!(send(&mut a, "book").await, "ok");
        assert_eq!(send(&mut a, "book 2").await, "available");
        assert_eq!(send(&mut b, "book").await, "ok");
        assert_eq!(send(&mut b, "book 2").await, "navailable");
        assert_eq!(b.state(), State::LoggedIn { user: 2, phase: Phase::Idle });

        assert_eq!(send(&mut a, "cancel").await, "ok");
        assert_eq!(send(&mut b, "book 2").await, "available");
    }

    #[tokio::test]
    async fn stray_input_while_reserving_keeps_the_claim() {
        let (ctx, clock) = context("stray.data");
        let mut a = logged_in(&ctx, 1).await;
        let mut b = logged_in(&ctx, 2).await;
        assert_eq!(send(&mut a, "book 4").await, "available");
        assert_eq!(send(&mut a, "today").await, "failed");
        assert_eq!(a.state(), State::LoggedIn { user: 1, phase: Phase::Idle });

        // still held by user 1
        assert_eq!(send(&mut b, "book 4").await, "navailable");
        // the holder may retry
        assert_eq!(send(&mut a, "book 4").await, "available");
        assert_eq!(send(&mut a, "logout").await, "failed");

        clock.advance(1);
        assert_eq!(send(&mut b, "book 4").await, "available");
    }

    #[tokio::test]
    async fn failed_commit_releases_claim() {
        let (ctx, _) = context("failcommit.data");
        ctx.engine.book(1, 9, Span::new(160, 165)).await.unwrap();
        let mut a = logged_in(&ctx, 1).await;
        let mut b = logged_in(&ctx, 2).await;
        assert_eq!(send(&mut a, "book 1").await, "available");
        assert_eq!(send(&mut a, "book 10/06/2020 12/06/2020").await, "navailable");
        assert_eq!(send(&mut b, "book 1").await, "available");
        // a date outside the season year is an invalid range
        assert_eq!(send(&mut b, "book 10/06/2021").await, "navailable");
        assert_eq!(send(&mut a, "book 1").await, "available");
    }

    #[tokio::test]
    async fn single_date_commit_starts_today() {
        let (ctx, _) = context("single.data");
        let mut a = logged_in(&ctx, 3).await;
        assert_eq!(send(&mut a, "book 0").await, "available");
        assert_eq!(send(&mut a, "book 07/06/2020").await, "done");
        let snap = ctx.engine.snapshot().await;
        assert_eq!(snap[0].reservations, vec![Reservation { owner: 3, span: Span::new(TODAY, 158) }]);
    }

    #[tokio::test]
    async fn commit_accepts_repeated_resource_id() {
        let (ctx, _) = context("repeat.data");
        let mut a = logged_in(&ctx, 3).await;
        assert_eq!(send(&mut a, "book").await, "ok");
        assert_eq!(send(&mut a, "book 5").await, "available");
        assert_eq!(send(&mut a, "book 5 02/07/2020").await, "done");

        assert_eq!(send(&mut a, "book 6").await, "available");
        assert_eq!(send(&mut a, "book 6 01/08/2020 03/08/2020").await, "done");

        assert_eq!(send(&mut a, "book 7").await, "available");
        assert_eq!(send(&mut a, "book 8 01/08/2020 03/08/2020").await, "failed");
        let snap = ctx.engine.snapshot().await;
        assert_eq!(snap[5].reservations.len(), 1);
        assert_eq!(snap[6].reservations.len(), 1);
        assert!(snap[7].reservations.is_empty());
        assert_eq!(snap[7].claim.map(|c| c.holder), Some(3));
    }

    #[tokio::test]
    async fn choosing_accepts_only_a_resource() {
        let (ctx, _) = context("choosing.data");
        let mut a = logged_in(&ctx, 1).await;
        assert_eq!(send(&mut a, "book").await, "ok");
        assert_eq!(send(&mut a, "available").await, "failed");
        assert_eq!(a.state(), State::LoggedIn { user: 1, phase: Phase::Idle });
        assert_eq!(send(&mut a, "book").await, "ok");
        assert_eq!(send(&mut a, "book x").await, "failed");
        assert_eq!(send(&mut a, "book").await, "ok");
        assert_eq!(send(&mut a, "book 10").await, "navailable");
    }

    #[tokio::test]
    async fn wrong_arity_fails_without_state_change() {
        let (ctx, _) = context("arity.data");
        let mut a = logged_in(&ctx, 1).await;
        for line in [
            "book 1 2",
            "available 1 2 3",
            "availrow",
            "availrow 0 1 2 3",
            "cancel",
            "logout now",
            "save it",
            "today x",
            "start x",
            "end x",
        ] {
            assert_eq!(send(&mut a, line).await, "failed", "{line}");
            assert_eq!(a.state(), State::LoggedIn { user: 1, phase: Phase::Idle });
        }
        assert_eq!(send(&mut a, "dance").await, "unknown");
    }

    #[tokio::test]
    async fn availability_variants() {
        let (ctx, _) = context("avail.data");
        for id in 0..10 {
            if id != 6 {
                ctx.engine.book(id, 9, Span::new(TODAY, TODAY)).await.unwrap();
            }
        }
        let mut a = logged_in(&ctx, 1).await;
        assert_eq!(send(&mut a, "available").await, "available 6");
        assert_eq!(send(&mut a, "available 20/06/2020").await, "available 6");
        assert_eq!(send(&mut a, "available 06/06/2020 20/06/2020").await, "available 0 1 2 3 4 5 6 7 8 9");
        assert_eq!(send(&mut a, "available bogus").await, "navailable");
        assert_eq!(send(&mut a, "available 20/06/2020 10/06/2020").await, "navailable");
        assert_eq!(send(&mut a, "availrow 0").await, "navailable");
        assert_eq!(send(&mut a, "availrow 1").await, "available 6");
        assert_eq!(send(&mut a, "availrow 2").await, "navailable");
        assert_eq!(send(&mut a, "availrow x").await, "failed");
    }

    #[tokio::test]
    async fn cancel_removes_only_own_bookings() {
        let (ctx, _) = context("cancel.data");
        ctx.engine.book(2, 1, Span::new(160, 165)).await.unwrap();
        ctx.engine.book(2, 2, Span::new(170, 175)).await.unwrap();
        let mut a = logged_in(&ctx, 1).await;
        assert_eq!(send(&mut a, "cancel 2").await, "cancel ok");
        assert_eq!(send(&mut a, "cancel 2").await, "cancel ok");
        assert_eq!(send(&mut a, "cancel 99").await, "failed");
        assert_eq!(send(&mut a, "cancel x").await, "failed");
        let snap = ctx.engine.snapshot().await;
        assert_eq!(snap[2].reservations, vec![Reservation { owner: 2, span: Span::new(170, 175) }]);
    }

    #[tokio::test]
    async fn dates_and_logout() {
        let (ctx, _) = context("dates.data");
        let mut a = logged_in(&ctx, 1).await;
        assert_eq!(send(&mut a, "today").await, "05/06/2020");
        assert_eq!(send(&mut a, "start").await, "01/06/2020");
        assert_eq!(send(&mut a, "end").await, "30/09/2020");
        let cmd = Command::parse("logout").unwrap();
        assert!(a.handle(&cmd).await.closes_session());
    }

    #[tokio::test]
    async fn save_writes_database() {
        let (ctx, _) = context("save.data");
        ctx.engine.book(0, 1, Span::new(160, 165)).await.unwrap();
        let mut a = logged_in(&ctx, 1).await;
        assert_eq!(send(&mut a, "save").await, "ok");
        let text = fs::read_to_string(ctx.database.path()).unwrap();
        assert_eq!(text.lines().count(), 10);
        assert_eq!(text.lines().next(), Some("1 0 0 1 160 165"));
    }

    #[test]
    fn commit_argument_forms() {
        let args = |s: &str| s.split(' ').map(str::to_string).collect::<Vec<_>>();
        let a = args("12/06/2020");
        assert_eq!(split_commit_args(&a), (None, &a[..]));
        let a = args("10/06/2020 12/06/2020");
        assert_eq!(split_commit_args(&a), (None, &a[..]));
        let a = args("3 12/06/2020");
        assert_eq!(split_commit_args(&a), (Some("3"), &a[1..]));
        let a = args("3 10/06/2020 12/06/2020");
        assert_eq!(split_commit_args(&a), (Some("3"), &a[1..]));
    }
}
