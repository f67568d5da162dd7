//! Server and channel management.

use super::{store_err, CommandError, CommandHandler};
use crate::irc::dispatch::ChatMessage;
use crate::irc::format::{Style, BAD, BOLD_WHITE, GOOD, PENDING};
use crate::irc::session::ConnState;
use crate::store::{ServerRecord, HOME};

/// `#` is implied when a channel name is given bare.
fn channel_name(name: &str) -> String {
    if name.starts_with('#') || name.starts_with('&') {
        name.to_owned()
    } else {
        format!("#{name}")
    }
}

fn state_style(state: Option<ConnState>) -> Style {
    match state {
        Some(ConnState::Connected) => GOOD,
        Some(ConnState::Connecting) => PENDING,
        Some(ConnState::Disconnected) | None => BAD,
    }
}

impl CommandHandler {
    pub(super) async fn server_list(&self, msg: &ChatMessage) {
        let mut out = String::new();
        for (name, record) in self.store.all().await {
            let session = self.pool.get(&name).await;
            let (state, current) = match &session {
                Some(session) => (
                    Some(session.conn_state().await),
                    session.current_channels().await,
                ),
                None => (None, Default::default()),
            };

            let channels: Vec<String> = record
                .channels
                .iter()
                .map(|channel| {
                    let style = if current.contains(channel) { GOOD } else { BAD };
                    style.paint(channel)
                })
                .collect();
            let state_label = state.map_or("none".to_owned(), |s| s.to_string());

            out.push_str(&format!(
                "{} addr={} state={}\n  {}\n",
                BOLD_WHITE.paint(&name),
                BOLD_WHITE.paint(&record.address),
                state_style(state).paint(&state_label),
                channels.join(", "),
            ));
        }
        msg.reply(out.trim()).await;
    }

    pub(super) async fn server_add(
        &self,
        msg: &ChatMessage,
        name: &str,
        address: &str,
    ) -> Result<(), CommandError> {
        if name == HOME {
            return Err(CommandError::HomeProtected("add"));
        }
        if let Some(existing) = self.store.find_by_address(address).await {
            return Err(CommandError::AddressInUse(existing));
        }
        self.store
            .add(name, ServerRecord::new(address))
            .await
            .map_err(store_err("failed to add"))?;

        msg.reply("server added! will connect").await;
        self.resync().await;
        Ok(())
    }

    pub(super) async fn server_remove(
        &self,
        msg: &ChatMessage,
        name: &str,
    ) -> Result<(), CommandError> {
        if name == HOME {
            return Err(CommandError::HomeProtected("remove"));
        }
        self.store
            .delete(name)
            .await
            .map_err(store_err("failed to remove"))?;

        msg.reply("server removed! will disconnect").await;
        self.resync().await;
        Ok(())
    }

    pub(super) async fn server_set_addr(
        &self,
        msg: &ChatMessage,
        name: &str,
        address: &str,
    ) -> Result<(), CommandError> {
        if name == HOME {
            return Err(CommandError::HomeProtected("update address of"));
        }
        if let Some(existing) = self.store.find_other_by_address(name, address).await {
            return Err(CommandError::AddressInUse(existing));
        }
        let mut record = self
            .store
            .get(name)
            .await
            .map_err(store_err("failed to get"))?;
        record.address = address.to_owned();
        self.store
            .put(name, record)
            .await
            .map_err(store_err("failed to update"))?;

        msg.reply("server address updated! will reconnect").await;
        self.resync().await;
        Ok(())
    }

    pub(super) async fn channel_add(
        &self,
        msg: &ChatMessage,
        server: &str,
        channel: &str,
    ) -> Result<(), CommandError> {
        let channel = channel_name(channel);
        let mut record = self
            .store
            .get(server)
            .await
            .map_err(store_err("failed to get"))?;
        if record.channels.contains(&channel) {
            return Err(CommandError::AlreadyInChannel);
        }
        record.channels.push(channel);
        self.store
            .put(server, record)
            .await
            .map_err(store_err("failed to put"))?;

        msg.reply("added channel! will join").await;
        self.resync().await;
        Ok(())
    }

    pub(super) async fn channel_remove(
        &self,
        msg: &ChatMessage,
        server: &str,
        channel: &str,
    ) -> Result<(), CommandError> {
        let channel = channel_name(channel);
        let mut record = self
            .store
            .get(server)
            .await
            .map_err(store_err("failed to get"))?;
        let Some(index) = record.channels.iter().position(|c| *c == channel) else {
            return Err(CommandError::NotInChannel);
        };
        record.channels.remove(index);
        self.store
            .put(server, record)
            .await
            .map_err(store_err("failed to put"))?;

        msg.reply("removed channel! will leave").await;
        self.resync().await;
        Ok(())
    }

    pub(super) async fn channel_sync(&self, msg: &ChatMessage) {
        let diff = msg.session.sync_channels().await;
        msg.reply(&format!(
            "resynced channels: joined {}, left {}",
            diff.joined.len(),
            diff.left.len()
        ))
        .await;
    }
}
