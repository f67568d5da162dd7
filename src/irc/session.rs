/// Session: one supervised connection to one IRC server.
///
/// A session registers with the server, learns its own user@host mask,
/// keeps its channel membership in line with a target set, and hands chat
/// lines to the dispatcher. The read loop runs under a supervisor and
/// reconnects on its own after any disconnect while the session is active.
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use rand::Rng;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::codec::{CodecError, IrcCodec};
use super::dispatch::{ChatMessage, SessionEvent};
use super::format::BOLD_WHITE;
use super::message::Message;
use super::transport::{IrcStream, Transport};

/// Protocol ceiling for one line, CR-LF included.
pub const MAX_FRAME_LEN: usize = 512;

type IrcReader = FramedRead<ReadHalf<IrcStream>, IrcCodec>;
type IrcWriter = FramedWrite<WriteHalf<IrcStream>, IrcCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("fault injected into liveness probe")]
    InjectedFault,
}

/// Settings shared by every session in a pool.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub nick: String,
    pub transport: Transport,
    pub reconnect_delay: Duration,
}

/// What one channel reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChannelDiff {
    pub joined: Vec<String>,
    pub left: Vec<String>,
    /// Target names that are not valid channel references.
    pub skipped: Vec<String>,
}

impl ChannelDiff {
    /// True when no frames were written.
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Whether `name` can be joined: `#` or `&` followed by at least one
/// character, with no space, comma or BEL.
pub fn is_channel(name: &str) -> bool {
    name.len() > 1
        && (name.starts_with('#') || name.starts_with('&'))
        && !name.contains([' ', ',', '\x07'])
}

/// The line shapes a session reacts to. Everything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Chat {
        sender: String,
        target: String,
        text: String,
    },
    /// `001` addressed to our nick.
    Welcome,
    /// We were kicked from `channel`.
    Kicked {
        actor: String,
        channel: String,
        reason: String,
    },
    /// `311` WHOIS reply about ourselves.
    SelfWhois { user: String, host: String },
    Ping(String),
    Other,
}

impl Inbound {
    pub fn classify(msg: &Message, nick: &str) -> Self {
        // Chat lines first: nothing a user types may be taken for a numeric.
        if msg.command.eq_ignore_ascii_case("PRIVMSG") {
            return match (msg.source_nick(), msg.params.as_slice()) {
                (Some(sender), [target, text, ..]) if !text.is_empty() => Self::Chat {
                    sender: sender.to_owned(),
                    target: target.clone(),
                    text: text.clone(),
                },
                _ => Self::Other,
            };
        }

        match msg.command.to_ascii_uppercase().as_str() {
            "001" => match msg.params.first() {
                Some(to) if to.eq_ignore_ascii_case(nick) => Self::Welcome,
                _ => Self::Other,
            },
            "KICK" => match (msg.source_nick(), msg.params.as_slice()) {
                (Some(actor), [channel, victim, rest @ ..])
                    if victim.eq_ignore_ascii_case(nick) && is_channel(channel) =>
                {
                    Self::Kicked {
                        actor: actor.to_owned(),
                        channel: channel.clone(),
                        reason: rest.first().cloned().unwrap_or_default(),
                    }
                }
                _ => Self::Other,
            },
            "311" => match msg.params.as_slice() {
                [me, who, user, host, ..]
                    if me.eq_ignore_ascii_case(nick) && who.eq_ignore_ascii_case(nick) =>
                {
                    Self::SelfWhois {
                        user: user.clone(),
                        host: host.clone(),
                    }
                }
                _ => Self::Other,
            },
            "PING" => Self::Ping(msg.params.first().cloned().unwrap_or_default()),
            _ => Self::Other,
        }
    }
}

/// An installed connection: the id ties the writer slot to the read loop
/// that owns it, the token closes it.
struct Link {
    id: u64,
    closer: CancellationToken,
}

struct SessionState {
    address: String,
    conn: ConnState,
    user: Option<String>,
    host: Option<String>,
    current: BTreeSet<String>,
    target: BTreeSet<String>,
    link: Option<Link>,
    links_opened: u64,
}

pub struct Session {
    name: String,
    config: Arc<SessionConfig>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Whether the session should be running at all.
    active: AtomicBool,
    /// Bumped by every `start`; a read loop only runs while it holds the
    /// current generation.
    generation: AtomicU64,
    fault_on_next_probe: AtomicBool,
    state: Mutex<SessionState>,
    /// Outbound half. Held for the whole of a multi-frame write.
    writer: Mutex<Option<(u64, IrcWriter)>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        config: Arc<SessionConfig>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            events,
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            fault_on_next_probe: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                address: address.into(),
                conn: ConnState::Disconnected,
                user: None,
                host: None,
                current: BTreeSet::new(),
                target: BTreeSet::new(),
                link: None,
                links_opened: 0,
            }),
            writer: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nick(&self) -> &str {
        &self.config.nick
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn address(&self) -> String {
        self.state.lock().await.address.clone()
    }

    pub async fn conn_state(&self) -> ConnState {
        self.state.lock().await.conn
    }

    /// Channels we are in, as far as we have observed.
    pub async fn current_channels(&self) -> BTreeSet<String> {
        self.state.lock().await.current.clone()
    }

    pub async fn target_channels(&self) -> BTreeSet<String> {
        self.state.lock().await.target.clone()
    }

    /// Our `user@host` as reported by the server, once known.
    pub async fn mask(&self) -> Option<String> {
        let st = self.state.lock().await;
        match (&st.user, &st.host) {
            (Some(user), Some(host)) => Some(format!("{user}@{host}")),
            _ => None,
        }
    }

    pub async fn set_target_channels<I, S>(&self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().await.target = channels.into_iter().map(Into::into).collect();
    }

    /// Make the next liveness probe fail, exercising recovery.
    pub fn arm_probe_fault(&self) {
        self.fault_on_next_probe.store(true, Ordering::SeqCst);
    }

    pub fn probe_fault_armed(&self) -> bool {
        self.fault_on_next_probe.load(Ordering::SeqCst)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Activate the session and spawn its supervised read loop.
    ///
    /// Returns `false` (and does nothing) if it is already active.
    pub async fn start(self: &Arc<Self>) -> bool {
        let _st = self.state.lock().await;
        if self.is_active() {
            warn!(server = %self.name, "can't start a session that's already active");
            return false;
        }
        // Bump before activating so a stale loop never sees itself current.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.store(true, Ordering::SeqCst);
        info!(server = %self.name, "starting session");
        tokio::spawn(Arc::clone(self).supervise(generation));
        true
    }

    /// Deactivate and close the socket. The read loop exits instead of
    /// reconnecting.
    pub async fn stop(&self) {
        let mut st = self.state.lock().await;
        self.active.store(false, Ordering::SeqCst);
        if let Some(link) = st.link.take() {
            link.closer.cancel();
        }
        info!(server = %self.name, "session stopped");
    }

    /// Start an inactive session, or drop the connection of an active one so
    /// its loop dials again.
    pub async fn reconnect(self: &Arc<Self>) {
        if !self.is_active() {
            self.start().await;
            return;
        }
        self.close_link().await;
    }

    /// Recovery after a fault: clear the one-shot flag, then reconnect.
    pub async fn recover(self: &Arc<Self>) {
        self.fault_on_next_probe.store(false, Ordering::SeqCst);
        warn!(server = %self.name, "recovering session");
        self.reconnect().await;
    }

    /// Point the session at a new address.
    ///
    /// A connected session is dropped so its loop redials at the new address;
    /// otherwise the next attempt picks it up. Returns whether a reconnect
    /// was forced.
    pub async fn set_address(&self, address: &str) -> bool {
        let mut st = self.state.lock().await;
        if st.address == address {
            return false;
        }
        info!(server = %self.name, from = %st.address, to = %address, "server address changed");
        st.address = address.to_owned();

        if st.conn != ConnState::Connected {
            return false;
        }
        match st.link.take() {
            Some(link) => {
                link.closer.cancel();
                true
            }
            None => false,
        }
    }

    async fn close_link(&self) -> bool {
        match self.state.lock().await.link.take() {
            Some(link) => {
                link.closer.cancel();
                true
            }
            None => false,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_active() && !self.superseded(generation)
    }

    /// A later `start` owns the connection state now.
    fn superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Record a failed attempt, unless a newer loop has taken over.
    async fn mark_disconnected(&self, generation: u64) {
        let mut st = self.state.lock().await;
        if !self.superseded(generation) {
            st.conn = ConnState::Disconnected;
        }
    }

    /// Run the read loop, restarting it if the task dies.
    async fn supervise(self: Arc<Self>, generation: u64) {
        loop {
            let task = tokio::spawn(Arc::clone(&self).run(generation));
            let Err(e) = task.await else {
                return;
            };

            error!(server = %self.name, "session loop died: {e}");
            self.fault_on_next_probe.store(false, Ordering::SeqCst);
            self.abandon_link(generation).await;

            if !self.is_current(generation) {
                return;
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
            if !self.is_current(generation) {
                return;
            }
            info!(server = %self.name, "restarting session loop");
        }
    }

    async fn run(self: Arc<Self>, generation: u64) {
        while self.is_current(generation) {
            if let Err(e) = self.connect_and_serve(generation).await {
                warn!(server = %self.name, "{e}");
            }
            if !self.is_current(generation) {
                info!(server = %self.name, "disconnected by request");
                break;
            }
            warn!(
                server = %self.name,
                delay = ?self.config.reconnect_delay,
                "disconnected, retrying"
            );
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// One connection: dial, register, read until the stream ends or the
    /// link is closed.
    async fn connect_and_serve(self: &Arc<Self>, generation: u64) -> Result<(), SessionError> {
        let address = {
            let mut st = self.state.lock().await;
            if !self.is_current(generation) {
                return Ok(());
            }
            // Replacing a connection always closes the previous one first.
            if let Some(link) = st.link.take() {
                link.closer.cancel();
            }
            st.conn = ConnState::Connecting;
            st.user = None;
            st.host = None;
            st.current.clear();
            st.address.clone()
        };
        info!(server = %self.name, %address, "connecting");

        let stream = match self.config.transport.connect(&address).await {
            Ok(stream) => stream,
            Err(source) => {
                self.mark_disconnected(generation).await;
                return Err(SessionError::Connect { address, source });
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader: IrcReader = FramedRead::new(read_half, IrcCodec);
        let mut writer: IrcWriter = FramedWrite::new(write_half, IrcCodec);

        if let Err(e) = self.register(&mut writer).await {
            self.mark_disconnected(generation).await;
            return Err(e);
        }

        let closer = CancellationToken::new();
        let link_id = {
            let mut slot = self.writer.lock().await;
            let mut st = self.state.lock().await;
            if !self.is_current(generation) {
                if !self.superseded(generation) {
                    st.conn = ConnState::Disconnected;
                }
                return Ok(());
            }
            st.links_opened += 1;
            let id = st.links_opened;
            st.link = Some(Link {
                id,
                closer: closer.clone(),
            });
            *slot = Some((id, writer));
            id
        };

        let result = loop {
            tokio::select! {
                biased;
                _ = closer.cancelled() => break Ok(()),
                frame = reader.next() => match frame {
                    Some(Ok(msg)) => self.handle_line(msg).await,
                    Some(Err(e)) => break Err(SessionError::Codec(e)),
                    None => break Ok(()),
                },
            }
        };

        self.release_link(link_id, generation).await;
        result
    }

    async fn register(&self, writer: &mut IrcWriter) -> Result<(), SessionError> {
        let nick = self.config.nick.as_str();
        let frames = [
            Message::new("NICK", [nick]),
            Message::new("USER", [nick, "0", "*", nick]),
            // Bot mode; networks disagree on the letter.
            Message::new("MODE", [nick, "+b"]),
            Message::new("MODE", [nick, "+B"]),
            // Our own mask sizes outgoing frames.
            Message::new("WHOIS", [nick]),
        ];
        write_all(writer, frames).await?;
        Ok(())
    }

    /// Tear down after the read loop for `link_id` ends, unless a newer
    /// connection has already taken its place.
    async fn release_link(&self, link_id: u64, generation: u64) {
        let mut slot = self.writer.lock().await;
        let mut st = self.state.lock().await;
        if slot.as_ref().is_some_and(|(id, _)| *id == link_id) {
            *slot = None;
        }
        let replaced = self.superseded(generation)
            || st.link.as_ref().is_some_and(|link| link.id != link_id);
        if !replaced {
            st.link = None;
            st.conn = ConnState::Disconnected;
        }
    }

    /// Forget whatever connection a dead loop left behind.
    async fn abandon_link(&self, generation: u64) {
        let mut slot = self.writer.lock().await;
        let mut st = self.state.lock().await;
        if self.superseded(generation) {
            return;
        }
        *slot = None;
        if let Some(link) = st.link.take() {
            link.closer.cancel();
        }
        st.conn = ConnState::Disconnected;
    }

    // ── Inbound ──────────────────────────────────────────────────

    async fn handle_line(self: &Arc<Self>, msg: Message) {
        match Inbound::classify(&msg, &self.config.nick) {
            Inbound::Chat {
                sender,
                target,
                text,
            } => {
                // A private message is addressed to our nick; reply to the sender.
                let reply_to = if is_channel(&target) {
                    target
                } else {
                    sender.clone()
                };
                let chat = ChatMessage {
                    session: Arc::clone(self),
                    sender,
                    reply_to,
                    text,
                };
                if self.events.send(SessionEvent::Chat(chat)).is_err() {
                    warn!(server = %self.name, "dispatcher gone, dropping chat line");
                }
            }
            Inbound::Welcome => {
                let promoted = {
                    let mut st = self.state.lock().await;
                    if st.conn == ConnState::Connecting {
                        st.conn = ConnState::Connected;
                        true
                    } else {
                        false
                    }
                };
                if promoted {
                    info!(server = %self.name, "connected");
                    self.sync_channels().await;
                }
            }
            Inbound::Kicked {
                actor,
                channel,
                reason,
            } => self.handle_kick(&actor, &channel, &reason).await,
            Inbound::SelfWhois { user, host } => {
                let mut st = self.state.lock().await;
                if st.user.is_none() && st.host.is_none() {
                    info!(server = %self.name, mask = %format!("{user}@{host}"), "got own mask");
                    st.user = Some(user);
                    st.host = Some(host);
                }
            }
            Inbound::Ping(token) => {
                if let Err(e) = self.write_frames(vec![Message::new("PONG", [token])]).await {
                    warn!(server = %self.name, "failed to answer PING: {e}");
                }
            }
            Inbound::Other => {}
        }
    }

    async fn handle_kick(&self, actor: &str, channel: &str, reason: &str) {
        let (tracked, address) = {
            let mut st = self.state.lock().await;
            (st.current.remove(channel), st.address.clone())
        };
        info!(server = %self.name, %actor, %channel, %reason, "kicked");

        let incident = format!(
            "kicked from {} by {} on {} for {}",
            BOLD_WHITE.paint(channel),
            BOLD_WHITE.paint(actor),
            BOLD_WHITE.paint(&address),
            BOLD_WHITE.paint(reason),
        );
        if self.events.send(SessionEvent::Incident(incident)).is_err() {
            warn!(server = %self.name, "dispatcher gone, dropping incident");
        }

        if !tracked {
            warn!(server = %self.name, %channel, "kicked from a channel we were never in?");
        }
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Bring current channel membership in line with the target set.
    ///
    /// Joins are assumed to succeed. Does nothing unless the session is
    /// active and connected.
    pub async fn sync_channels(&self) -> ChannelDiff {
        let mut slot = self.writer.lock().await;
        let mut diff = ChannelDiff::default();

        {
            let mut st = self.state.lock().await;
            if !self.is_active() || st.conn != ConnState::Connected || slot.is_none() {
                warn!(server = %self.name, "can't sync channels while inactive or disconnected");
                return diff;
            }

            let SessionState {
                current, target, ..
            } = &mut *st;
            for channel in target.iter() {
                if current.contains(channel) {
                    continue;
                }
                if !is_channel(channel) {
                    warn!(server = %self.name, name = %channel, "can't join invalid channel");
                    diff.skipped.push(channel.clone());
                    continue;
                }
                current.insert(channel.clone());
                diff.joined.push(channel.clone());
            }
            current.retain(|channel| {
                let keep = target.contains(channel);
                if !keep {
                    diff.left.push(channel.clone());
                }
                keep
            });
        }

        let Some((_, writer)) = slot.as_mut() else {
            return diff;
        };
        let frames: Vec<Message> = diff
            .joined
            .iter()
            .map(|channel| Message::new("JOIN", [channel.as_str()]))
            .chain(
                diff.left
                    .iter()
                    .map(|channel| Message::new("PART", [channel.as_str()])),
            )
            .collect();
        if let Err(e) = write_all(writer, frames).await {
            warn!(server = %self.name, "failed to write channel changes: {e}");
        }

        for channel in &diff.joined {
            info!(server = %self.name, name = %channel, "channel joined");
        }
        for channel in &diff.left {
            info!(server = %self.name, name = %channel, "channel left");
        }
        diff
    }

    /// Send `text` to `to`. Multi-line text goes out as one labelled batch.
    pub async fn send(&self, to: &str, text: &str) -> Result<(), SessionError> {
        // A bare CR ends a line on the wire just like LF does.
        let text = text.replace("\r\n", "\n").replace('\0', "");
        let lines: Vec<&str> = text.trim_end_matches(['\r', '\n']).split(['\r', '\n']).collect();
        let source = self.source().await;

        let frames = match lines.as_slice() {
            [line] => vec![self.privmsg(source.as_deref(), to, line)],
            _ => {
                // Label collisions between concurrent batches are cosmetic.
                let label = format!("{:03}", rand::thread_rng().gen_range(0..1000));
                let mut frames = Vec::with_capacity(lines.len() + 2);
                frames.push(Message::new(
                    "BATCH",
                    [format!("+{label}"), "draft/multiline".into(), to.to_owned()],
                ));
                frames.extend(lines.iter().map(|line| {
                    self.privmsg(source.as_deref(), to, line)
                        .with_tags(format!("batch={label}"))
                }));
                frames.push(Message::new("BATCH", [format!("-{label}")]));
                frames
            }
        };

        self.write_frames(frames).await
    }

    /// Bytes a single-line message to `to` costs beyond its text.
    pub async fn frame_overhead(&self, to: &str) -> usize {
        let source = self.source().await;
        Message {
            tags: None,
            prefix: source,
            command: "PRIVMSG".into(),
            params: vec![to.to_owned(), String::new()],
        }
        .wire_len()
    }

    /// Heartbeat. Only connected, active sessions probe.
    pub async fn probe(&self) -> Result<(), SessionError> {
        if !self.is_active() || self.conn_state().await != ConnState::Connected {
            return Ok(());
        }
        if self.fault_on_next_probe.swap(false, Ordering::SeqCst) {
            return Err(SessionError::InjectedFault);
        }
        match self.write_frames(vec![Message::new("PING", ["hi"])]).await {
            // Link torn down since the state check: a recovery is already under way.
            Err(SessionError::NotConnected) => Ok(()),
            other => other,
        }
    }

    /// `nick!user@host`, once the mask is known.
    async fn source(&self) -> Option<String> {
        self.mask()
            .await
            .map(|mask| format!("{}!{mask}", self.config.nick))
    }

    fn privmsg(&self, source: Option<&str>, to: &str, text: &str) -> Message {
        let mut msg = Message::new("PRIVMSG", [to, text]);
        if let Some(source) = source {
            msg = msg.with_prefix(source);
        }
        // Over-long frames still go out; the server may truncate them.
        let len = msg.wire_len();
        if len > MAX_FRAME_LEN {
            warn!(server = %self.name, bytes = len, "sent message too large");
        }
        msg
    }

    /// Write `frames` back to back; no other writer can interleave.
    async fn write_frames(&self, frames: Vec<Message>) -> Result<(), SessionError> {
        let mut slot = self.writer.lock().await;
        let Some((_, writer)) = slot.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        write_all(writer, frames).await?;
        Ok(())
    }
}

async fn write_all(
    writer: &mut IrcWriter,
    frames: impl IntoIterator<Item = Message>,
) -> Result<(), CodecError> {
    for frame in frames {
        writer.feed(frame).await?;
    }
    writer.flush().await
}
