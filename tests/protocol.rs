use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use lido::calendar::ManualClock;
use lido::config::parse_season;
use lido::context::Context;
use lido::engine::Engine;
use lido::persist::Database;
use lido::pool::ConnectionPool;
use lido::shutdown::drain_and_persist;
use lido::wire::{self, ReplyCodec};

// ── Test infrastructure ──────────────────────────────────────

const SEASON: &str = "\
rows = 2
cols = 5
start = 01/06/2020
end = 30/09/2020
";

struct TestServer {
    addr: SocketAddr,
    ctx: Arc<Context>,
    stop: CancellationToken,
}

async fn start_test_server(name: &str, max_connections: usize) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join("lido_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}.data"));
    let _ = std::fs::remove_file(&path);

    let season = parse_season(SEASON).unwrap();
    // 05/06/2020
    let clock = Arc::new(ManualClock::new(156));
    let ctx = Arc::new(Context::new(
        Engine::new(season),
        ConnectionPool::new(max_connections),
        Database::new(path),
        clock,
    ));

    let stop = CancellationToken::new();
    tokio::spawn(wire::serve(listener, ctx.clone(), stop.clone()));
    TestServer { addr, ctx, stop }
}

struct Client {
    framed: Framed<TcpStream, ReplyCodec>,
}

impl Client {
    /// Connect and return the client with the server's greeting.
    async fn connect(addr: SocketAddr) -> (Self, Option<String>) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Client { framed: Framed::new(stream, ReplyCodec::new()) };
        let greeting = client.recv().await;
        (client, greeting)
    }

    /// Connect and log in, asserting both succeed.
    async fn login(addr: SocketAddr, user: u32) -> Self {
        let (mut client, greeting) = Client::connect(addr).await;
        assert_eq!(greeting.as_deref(), Some("welcome"));
        assert_eq!(client.request(&format!("login {user}")).await, "ok");
        client
    }

    /// Next reply, or `None` once the server has closed the connection.
    async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for reply")
            .map(|r| r.unwrap())
    }

    async fn request(&mut self, line: &str) -> String {
        self.framed.send(line).await.unwrap();
        self.recv().await.expect("connection closed")
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn greets_and_requires_login() {
    let server = start_test_server("greet", 4).await;
    let (mut c, greeting) = Client::connect(server.addr).await;
    assert_eq!(greeting.as_deref(), Some("welcome"));
    assert_eq!(c.request("available").await, "nlogin");
    assert_eq!(c.request("login 7").await, "ok");
    assert_eq!(c.request("today").await, "05/06/2020");
    assert_eq!(c.request("logout").await, "bye");
    assert_eq!(c.recv().await, None);
}

#[tokio::test]
async fn booking_is_visible_to_other_sessions() {
    let server = start_test_server("e2e", 4).await;
    let mut a = Client::login(server.addr, 7).await;
    let mut b = Client::login(server.addr, 8).await;

    assert_eq!(a.request("book").await, "ok");
    assert_eq!(a.request("book 3").await, "available");
    assert_eq!(a.request("book 10/06/2020 12/06/2020").await, "done");

    assert_eq!(
        b.request("available 10/06/2020 12/06/2020").await,
        "available 0 1 2 4 5 6 7 8 9"
    );
    assert_eq!(b.request("available 13/06/2020 14/06/2020").await, "available 0 1 2 3 4 5 6 7 8 9");

    // only the owner's cancel removes the booking
    assert_eq!(b.request("cancel 3").await, "cancel ok");
    assert_eq!(b.request("availrow 0 11/06/2020 11/06/2020").await, "available 0 1 2 4");
    assert_eq!(a.request("cancel 3").await, "cancel ok");
    assert_eq!(b.request("availrow 0 11/06/2020 11/06/2020").await, "available 0 1 2 3 4");
}

#[tokio::test]
async fn concurrent_claims_admit_one_holder() {
    let server = start_test_server("contend", 8).await;
    let mut handles = Vec::new();
    for user in 1..=6 {
        let addr = server.addr;
        handles.push(tokio::spawn(async move {
            let mut c = Client::login(addr, user).await;
            let reply = c.request("book 4").await;
            (c, reply)
        }));
    }
    let mut winners = 0;
    let mut clients = Vec::new();
    for h in handles {
        let (c, reply) = h.await.unwrap();
        match reply.as_str() {
            "available" => winners += 1,
            "navailable" => {}
            other => panic!("unexpected reply {other}"),
        }
        clients.push(c);
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn serverfull_when_pool_exhausted() {
    let server = start_test_server("full", 2).await;
    let mut a = Client::login(server.addr, 1).await;
    let _b = Client::login(server.addr, 2).await;

    let (mut c, greeting) = Client::connect(server.addr).await;
    assert_eq!(greeting.as_deref(), Some("serverfull"));
    assert_eq!(c.recv().await, None);

    // a freed slot admits exactly one more client
    assert_eq!(a.request("logout").await, "bye");
    let mut admitted = None;
    for _ in 0..50 {
        let (c, greeting) = Client::connect(server.addr).await;
        if greeting.as_deref() == Some("welcome") {
            admitted = Some(c);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(admitted.is_some(), "slot was never released");
    let (_, greeting) = Client::connect(server.addr).await;
    assert_eq!(greeting.as_deref(), Some("serverfull"));
}

#[tokio::test]
async fn save_command_writes_database() {
    let server = start_test_server("save", 2).await;
    let mut a = Client::login(server.addr, 5).await;
    assert_eq!(a.request("book 9").await, "available");
    assert_eq!(a.request("book 9 20/06/2020 25/06/2020").await, "done");
    assert_eq!(a.request("save").await, "ok");

    let text = std::fs::read_to_string(server.ctx.database.path()).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 10);
    assert_eq!(lines[9], "1 0 0 5 171 176");
    assert!(lines[..9].iter().all(|l| *l == "0 0 0"));
}

#[tokio::test]
async fn shutdown_closes_sessions_and_persists() {
    let server = start_test_server("shutdown", 4).await;
    let mut a = Client::login(server.addr, 5).await;
    let mut b = Client::login(server.addr, 6).await;
    assert_eq!(a.request("book 0").await, "available");
    assert_eq!(a.request("book 07/06/2020").await, "done");
    assert_eq!(b.request("book 1").await, "available");

    server.stop.cancel();
    assert_eq!(drain_and_persist(&server.ctx).await.unwrap(), 2);

    assert_eq!(a.recv().await, None);
    assert_eq!(b.recv().await, None);

    let text = std::fs::read_to_string(server.ctx.database.path()).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], "1 0 0 5 156 158");
    assert_eq!(lines[1], "0 6 156");
}
