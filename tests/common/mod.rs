//! Fake IRC server for driving sessions over loopback.
//!
//! Sessions connect with the plain transport. Every read has a timeout so a
//! missing frame fails the test instead of hanging it.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lagoon_bot::irc::dispatch::SessionEvent;
use lagoon_bot::irc::session::{ConnState, Session, SessionConfig};
use lagoon_bot::irc::transport::Transport;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const NICK: &str = "lagoonbot";
pub const OWNER: &str = "owner";
pub const RECONNECT: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub fn session_config() -> SessionConfig {
    SessionConfig {
        nick: NICK.into(),
        transport: Transport::Plain,
        reconnect_delay: RECONNECT,
    }
}

pub type Events = mpsc::UnboundedReceiver<SessionEvent>;

pub fn new_session(name: &str, address: &str) -> (Arc<Session>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(name, address, Arc::new(session_config()), tx);
    (session, rx)
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

pub struct FakeServer {
    listener: TcpListener,
    pub addr: String,
}

impl FakeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        Self { listener, addr }
    }

    pub async fn accept(&self) -> FakeClient {
        let (stream, _) = tokio::time::timeout(READ_TIMEOUT, self.listener.accept())
            .await
            .expect("no connection arrived")
            .unwrap();
        let (read, write) = stream.into_split();
        FakeClient {
            lines: BufReader::new(read).lines(),
            writer: write,
        }
    }

    /// Accept and consume the registration burst.
    pub async fn accept_registered(&self) -> FakeClient {
        let mut client = self.accept().await;
        client.expect_registration().await;
        client
    }

    pub async fn expect_no_connection(&self, wait: Duration) {
        if let Ok(Ok((_, addr))) = tokio::time::timeout(wait, self.listener.accept()).await {
            panic!("unexpected connection from {addr}");
        }
    }
}

/// The server's end of one session connection.
pub struct FakeClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeClient {
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next line from the session, or `None` once it hung up.
    pub async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(READ_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .ok()
            .flatten()
    }

    pub async fn expect(&mut self, want: &str) {
        assert_eq!(self.recv().await.as_deref(), Some(want));
    }

    pub async fn expect_closed(&mut self) {
        if let Some(line) = self.recv().await {
            panic!("expected hangup, got {line:?}");
        }
    }

    /// Assert nothing arrives for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Ok(Some(line))) = tokio::time::timeout(wait, self.lines.next_line()).await {
            panic!("unexpected line {line:?}");
        }
    }

    pub async fn expect_registration(&mut self) {
        self.expect(&format!("NICK {NICK}")).await;
        self.expect(&format!("USER {NICK} 0 * {NICK}")).await;
        self.expect(&format!("MODE {NICK} +b")).await;
        self.expect(&format!("MODE {NICK} +B")).await;
        self.expect(&format!("WHOIS {NICK}")).await;
    }

    pub async fn welcome(&mut self) {
        self.send(&format!(":irc.test 001 {NICK} :Welcome to the test network"))
            .await;
    }

    pub async fn whois_self(&mut self, user: &str, host: &str) {
        self.send(&format!(":irc.test 311 {NICK} {NICK} {user} {host} * :{NICK}"))
            .await;
    }
}

/// Poll `check` until it holds, failing after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting until {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_connected(session: &Arc<Session>) {
    eventually("session is connected", || async move {
        session.conn_state().await == ConnState::Connected
    })
    .await;
}

pub async fn next_event(events: &mut Events) -> SessionEvent {
    tokio::time::timeout(READ_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}
