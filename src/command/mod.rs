//! Chat command layer.
//!
//! In channels a line must start with the command prefix; private messages
//! are taken as commands as they are. Admin commands are refused unless the
//! sender is the owner talking to us on the home server, and refusals are
//! reported as incidents.

mod admin;
mod general;
pub mod menu;
mod testing;

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use crate::config::Config;
use crate::irc::dispatch::{ChatMessage, Handler};
use crate::irc::pool::Pool;
use crate::store::{ServerStore, StoreError, HOME};
use menu::{Action, Category, Resolution, TopLevel};

/// Failures a command reports back to whoever ran it.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{action}: {source}")]
    Store {
        action: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("cannot {0} home server")]
    HomeProtected(&'static str),
    #[error("server with same address already exists: {0}")]
    AddressInUse(String),
    #[error("already in channel")]
    AlreadyInChannel,
    #[error("not in channel")]
    NotInChannel,
}

fn store_err(action: &'static str) -> impl FnOnce(StoreError) -> CommandError {
    move |source| CommandError::Store { action, source }
}

pub struct CommandHandler {
    pool: Arc<Pool>,
    store: Arc<ServerStore>,
    prefix: String,
    owner: String,
    commands: Vec<TopLevel>,
}

impl CommandHandler {
    pub fn new(pool: Arc<Pool>, store: Arc<ServerStore>, config: &Config) -> Self {
        Self {
            pool,
            store,
            prefix: config.command_prefix.clone(),
            owner: config.owner.clone(),
            commands: menu::commands(),
        }
    }

    /// Handle one chat line.
    pub async fn run(&self, msg: ChatMessage) {
        let text = msg.text.trim();
        let body = match text.strip_prefix(self.prefix.as_str()) {
            Some(body) => body,
            None if msg.in_channel() => return,
            None => text,
        };

        let args: Vec<String> = body.split_whitespace().map(str::to_owned).collect();
        let Some(name) = args.first().map(|a| a.to_lowercase()) else {
            self.unknown_command(&msg).await;
            return;
        };
        let Some(command) = self.commands.iter().find(|c| c.node.name() == name) else {
            self.unknown_command(&msg).await;
            return;
        };

        if !self.may_run(&msg, command.category) {
            msg.reply("sorry you can't run that command :(").await;
            self.pool
                .report_incident(&format!(
                    "\"{}\" tried to run \"{}\" on \"{}\"",
                    msg.sender,
                    msg.text,
                    msg.session.name()
                ))
                .await;
            return;
        }

        match command.node.resolve(&args[1..]) {
            Resolution::Usage(usage) => {
                msg.reply(&format!("usage: {}{usage}", self.visible_prefix(&msg)))
                    .await;
            }
            Resolution::Run { action, args } => {
                info!(
                    server = %msg.session.name(),
                    sender = %msg.sender,
                    ?action,
                    "running command"
                );
                if let Err(e) = self.execute(action, &msg, args).await {
                    msg.reply(&e.to_string()).await;
                }
            }
        }
    }

    async fn execute(
        &self,
        action: Action,
        msg: &ChatMessage,
        args: &[String],
    ) -> Result<(), CommandError> {
        match action {
            Action::Help => self.help(msg).await,
            Action::Info => self.info(msg).await,
            Action::ServerList => self.server_list(msg).await,
            Action::ServerAdd => return self.server_add(msg, &args[0], &args[1]).await,
            Action::ServerRemove => return self.server_remove(msg, &args[0]).await,
            Action::ServerSetAddr => return self.server_set_addr(msg, &args[0], &args[1]).await,
            Action::ChannelAdd => return self.channel_add(msg, &args[0], &args[1]).await,
            Action::ChannelRemove => return self.channel_remove(msg, &args[0], &args[1]).await,
            Action::ChannelSync => self.channel_sync(msg).await,
            Action::TestPing => msg.reply("pong!").await,
            Action::TestMsgsize => self.test_msgsize(msg).await,
            Action::TestClientPanic => self.test_client_panic(msg).await,
            Action::TestCommandPanic => panic!("test panic"),
        }
        Ok(())
    }

    fn is_owner(&self, sender: &str) -> bool {
        sender.eq_ignore_ascii_case(&self.owner)
    }

    /// Admin commands only count from the owner on the home server; other
    /// networks could hand out the owner's nick to anyone.
    fn may_run(&self, msg: &ChatMessage, category: Category) -> bool {
        match category {
            Category::General => true,
            Category::Admin => msg.session.name() == HOME && self.is_owner(&msg.sender),
        }
    }

    fn visible_prefix(&self, msg: &ChatMessage) -> &str {
        if msg.in_channel() {
            &self.prefix
        } else {
            ""
        }
    }

    async fn unknown_command(&self, msg: &ChatMessage) {
        msg.reply(&format!(
            "unknown command. type {}help",
            self.visible_prefix(msg)
        ))
        .await;
    }

    /// Reconcile the pool against the store after a change.
    async fn resync(&self) {
        let servers = self.store.all().await;
        let report = self.pool.sync(&servers).await;
        info!(
            created = ?report.created,
            removed = ?report.removed,
            readdressed = ?report.readdressed,
            "resynced sessions"
        );
    }
}

impl Handler for CommandHandler {
    fn handle(&self, msg: ChatMessage) -> BoxFuture<'_, ()> {
        Box::pin(self.run(msg))
    }
}
