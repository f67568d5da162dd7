/// Chat commands end to end: fake server → session → dispatcher → handler
/// → reply on the wire.
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use lagoon_bot::command::CommandHandler;
use lagoon_bot::config::Config;
use lagoon_bot::irc::dispatch::spawn_event_processor;
use lagoon_bot::irc::message::Message;
use lagoon_bot::irc::pool::Pool;
use lagoon_bot::store::{ServerRecord, ServerStore, HOME};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

struct Bot {
    pool: Arc<Pool>,
    store: Arc<ServerStore>,
    home: FakeServer,
    client: FakeClient,
}

async fn start_bot() -> Bot {
    let home = FakeServer::bind().await;
    let store = Arc::new(ServerStore::new());
    store.pin_home(&home.addr).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let pool = Arc::new(Pool::new(session_config(), OWNER, tx));
    let config = Config {
        nick: NICK.into(),
        owner: OWNER.into(),
        ..Config::default()
    };
    let handler = Arc::new(CommandHandler::new(
        Arc::clone(&pool),
        Arc::clone(&store),
        &config,
    ));
    spawn_event_processor(Arc::clone(&pool), rx, handler);

    pool.sync(&store.all().await).await;
    let mut client = home.accept_registered().await;
    client.welcome().await;
    wait_connected(&pool.get(HOME).await.unwrap()).await;

    Bot {
        pool,
        store,
        home,
        client,
    }
}

impl Bot {
    async fn say(&mut self, from: &str, to: &str, text: &str) {
        self.client
            .send(&format!(":{from}!u@example.org PRIVMSG {to} :{text}"))
            .await;
    }

    /// Next reply as `(target, text)`.
    async fn reply(&mut self) -> (String, String) {
        let line = self.client.recv().await.unwrap();
        let msg = Message::parse(&line).unwrap();
        assert_eq!(msg.command, "PRIVMSG", "unexpected frame {line:?}");
        (msg.params[0].clone(), msg.params[1].clone())
    }

    /// Text lines of a batched reply.
    async fn batch(&mut self) -> Vec<String> {
        let open = Message::parse(&self.client.recv().await.unwrap()).unwrap();
        assert_eq!(open.command, "BATCH");
        let mut lines = Vec::new();
        loop {
            let msg = Message::parse(&self.client.recv().await.unwrap()).unwrap();
            if msg.command == "BATCH" {
                return lines;
            }
            lines.push(msg.params[1].clone());
        }
    }
}

#[tokio::test]
async fn channel_lines_need_the_prefix() {
    let mut bot = start_bot().await;

    bot.say("alice", "#general", "info").await;
    bot.client.expect_silence(Duration::from_millis(100)).await;

    bot.say("alice", "#general", "!info").await;
    let (to, text) = bot.reply().await;
    assert_eq!(to, "#general");
    assert!(text.starts_with("hi im lagoonbot"));
}

#[tokio::test]
async fn unknown_command_hint_matches_context() {
    let mut bot = start_bot().await;

    bot.say("alice", "#general", "!bogus").await;
    assert_eq!(
        bot.reply().await,
        ("#general".into(), "unknown command. type !help".into())
    );

    bot.say("alice", NICK, "bogus").await;
    assert_eq!(
        bot.reply().await,
        ("alice".into(), "unknown command. type help".into())
    );
}

#[tokio::test]
async fn help_lists_only_what_sender_may_run() {
    let mut bot = start_bot().await;

    bot.say("alice", NICK, "help").await;
    let lines = bot.batch().await;
    assert_eq!(
        lines,
        vec!["general:", "  help: show all commands", "  info: about me"]
    );

    bot.say(OWNER, NICK, "help").await;
    let lines = bot.batch().await;
    assert_eq!(lines[0], "hi owner <3");
    assert!(lines.contains(&"admin:".to_owned()));
    assert!(lines.contains(&"  server: manage servers".to_owned()));
}

#[tokio::test]
async fn admin_refusal_is_reported_to_owner() {
    let mut bot = start_bot().await;

    bot.say("mallory", NICK, "server list").await;
    assert_eq!(
        bot.reply().await,
        ("mallory".into(), "sorry you can't run that command :(".into())
    );
    let (to, text) = bot.reply().await;
    assert_eq!(to, OWNER);
    assert!(text.contains("\"mallory\" tried to run \"server list\" on \"home\""));
}

#[tokio::test]
async fn usage_for_missing_arguments() {
    let mut bot = start_bot().await;

    bot.say(OWNER, NICK, "server add alt").await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "usage: server add <name> <address>".into())
    );

    bot.say(OWNER, "#general", "!server set").await;
    let lines = bot.batch().await;
    assert_eq!(lines, vec!["usage: !server set <subcommand>", "  addr"]);
}

#[tokio::test]
async fn home_server_is_protected() {
    let mut bot = start_bot().await;

    bot.say(OWNER, NICK, "server remove home").await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "cannot remove home server".into())
    );
    bot.say(OWNER, NICK, "server add other 127.0.0.1:1").await;
    bot.reply().await;

    let home_addr = bot.home.addr.clone();
    bot.say(OWNER, NICK, &format!("server add copy {home_addr}")).await;
    assert_eq!(
        bot.reply().await,
        (
            OWNER.into(),
            "server with same address already exists: home".into()
        )
    );
}

#[tokio::test]
async fn adding_a_server_connects_to_it() {
    let mut bot = start_bot().await;
    let alt = FakeServer::bind().await;

    bot.say(OWNER, NICK, &format!("server add alt {}", alt.addr)).await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "server added! will connect".into())
    );
    alt.accept_registered().await;
    assert!(bot.store.get("alt").await.is_ok());
    assert!(bot.pool.get("alt").await.is_some());

    bot.say(OWNER, NICK, "server add alt 127.0.0.1:2").await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "failed to add: already exists: alt".into())
    );
}

#[tokio::test]
async fn set_addr_only_clashes_with_other_servers() {
    let mut bot = start_bot().await;
    let alt = FakeServer::bind().await;

    bot.say(OWNER, NICK, &format!("server add alt {}", alt.addr)).await;
    bot.reply().await;
    alt.accept_registered().await;

    // Re-setting a server's own address is not a clash, and keeps the link.
    bot.say(OWNER, NICK, &format!("server set addr alt {}", alt.addr)).await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "server address updated! will reconnect".into())
    );
    alt.expect_no_connection(RECONNECT * 4).await;
    assert_eq!(bot.store.get("alt").await.unwrap().address, alt.addr);

    bot.say(OWNER, NICK, "server add beta 127.0.0.1:2").await;
    bot.reply().await;
    bot.say(OWNER, NICK, &format!("server set addr beta {}", alt.addr)).await;
    assert_eq!(
        bot.reply().await,
        (
            OWNER.into(),
            "server with same address already exists: alt".into()
        )
    );
    assert_eq!(bot.store.get("beta").await.unwrap().address, "127.0.0.1:2");
}

#[tokio::test]
async fn channel_add_joins_and_normalises_name() {
    let mut bot = start_bot().await;

    bot.say(OWNER, NICK, "channel add home ops").await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "added channel! will join".into())
    );
    bot.client.expect("JOIN #ops").await;
    assert_eq!(
        bot.store.get(HOME).await.unwrap(),
        ServerRecord::new(bot.home.addr.clone()).with_channels(["#ops"])
    );

    bot.say(OWNER, NICK, "channel add home #ops").await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "already in channel".into())
    );

    bot.say(OWNER, NICK, "channel remove home #ops").await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "removed channel! will leave".into())
    );
    bot.client.expect("PART #ops").await;
}

#[tokio::test]
async fn command_panic_is_answered() {
    let mut bot = start_bot().await;

    bot.say(OWNER, NICK, "test commandpanic").await;
    assert_eq!(
        bot.reply().await,
        (OWNER.into(), "command panicked: test panic".into())
    );

    // Still connected and serving.
    bot.say(OWNER, NICK, "test ping").await;
    assert_eq!(bot.reply().await, (OWNER.into(), "pong!".into()));
}

#[tokio::test]
async fn client_panic_arms_the_probe() {
    let mut bot = start_bot().await;

    bot.say(OWNER, NICK, "test clientpanic").await;
    bot.reply().await;
    let home = bot.pool.get(HOME).await.unwrap();
    assert!(home.probe_fault_armed());

    bot.pool.probe_all().await;
    bot.client.expect_closed().await;
    bot.home.accept_registered().await;
}
