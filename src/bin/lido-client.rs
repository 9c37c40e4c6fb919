//! Interactive client: forwards stdin lines to the server and prints each
//! reply until `bye` or until the server closes the connection.

use std::process::ExitCode;

use tokio::io::BufReader;
use tokio::net::TcpStream;

use lido::client::relay;

#[tokio::main]
async fn main() -> ExitCode {
    let host = std::env::var("LIDO_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("LIDO_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(12345);

    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("cannot connect to {host}:{port}: {e}");
            return ExitCode::FAILURE;
        }
    };

    match relay(BufReader::new(tokio::io::stdin()), stream, tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("connection error: {e}");
            ExitCode::FAILURE
        }
    }
}
