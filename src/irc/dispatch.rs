//! Event dispatch: session events are queued here and handled off the
//! sessions' read loops.
//!
//! Each chat line gets its own task, so a slow or panicking handler never
//! stalls reading from the server.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::pool::Pool;
use super::session::{is_channel, Session};

/// Something a session wants handled elsewhere.
#[derive(Debug)]
pub enum SessionEvent {
    /// A user said something to us or to a channel we are in.
    Chat(ChatMessage),
    /// Something the owner should hear about.
    Incident(String),
}

/// An inbound chat line with enough context to reply.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// The session it arrived on.
    pub session: Arc<Session>,
    pub sender: String,
    /// The channel for channel chat, the sender for private messages.
    pub reply_to: String,
    pub text: String,
}

impl ChatMessage {
    /// Whether the line was said in a channel rather than privately.
    pub fn in_channel(&self) -> bool {
        is_channel(&self.reply_to)
    }

    /// Reply where the line came from. Failures are logged, not returned.
    pub async fn reply(&self, text: &str) {
        if let Err(e) = self.session.send(&self.reply_to, text).await {
            warn!(
                server = %self.session.name(),
                to = %self.reply_to,
                "failed to reply: {e}"
            );
        }
    }
}

/// Consumer of chat lines.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, msg: ChatMessage) -> BoxFuture<'_, ()>;
}

/// Drain `events`: chat lines go to `handler`, incidents to the owner.
///
/// A panic inside the handler is answered in place of the reply it would
/// have given; the session stays connected.
pub fn spawn_event_processor(
    pool: Arc<Pool>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    handler: Arc<dyn Handler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Chat(msg) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        let task = tokio::spawn({
                            let handler = Arc::clone(&handler);
                            let msg = msg.clone();
                            async move { handler.handle(msg).await }
                        });
                        if let Err(e) = task.await {
                            let reason = panic_reason(e);
                            error!(
                                server = %msg.session.name(),
                                sender = %msg.sender,
                                text = %msg.text,
                                "command panicked: {reason}"
                            );
                            msg.reply(&format!("command panicked: {reason}")).await;
                        }
                    });
                }
                SessionEvent::Incident(text) => {
                    let pool = Arc::clone(&pool);
                    tokio::spawn(async move {
                        pool.report_incident(&text).await;
                    });
                }
            }
        }
    })
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
