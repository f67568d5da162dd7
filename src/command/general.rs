use super::menu::Category;
use super::CommandHandler;
use crate::irc::dispatch::ChatMessage;

impl CommandHandler {
    /// Commands the sender may run, grouped by category.
    pub(super) async fn help(&self, msg: &ChatMessage) {
        let mut out = String::new();
        if self.is_owner(&msg.sender) {
            out.push_str(&format!("hi {} <3\n", msg.sender));
        }

        for category in [Category::General, Category::Admin] {
            if !self.may_run(msg, category) {
                continue;
            }
            let listed: Vec<_> = self
                .commands
                .iter()
                .filter(|c| c.category == category)
                .collect();
            if listed.is_empty() {
                continue;
            }
            out.push_str(category.label());
            out.push_str(":\n");
            for command in listed {
                out.push_str(&format!("  {}: {}\n", command.node.name(), command.description));
            }
        }

        msg.reply(out.trim()).await;
    }

    pub(super) async fn info(&self, msg: &ChatMessage) {
        msg.reply(&format!(
            "hi im {} ({} v{})",
            self.pool.nick(),
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))
        .await;
    }
}
