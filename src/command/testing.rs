//! `test` subcommands for poking at a live session.

use tracing::info;

use super::CommandHandler;
use crate::irc::dispatch::ChatMessage;

const FITTING_SIZES: [usize; 5] = [200, 300, 400, 500, 512];
const OVERSIZED: [usize; 3] = [513, 520, 530];

/// Text that makes a single-line frame exactly `size` bytes, given the
/// frame's `overhead`. The text starts with a description of itself.
pub(super) fn sized_text(size: usize, overhead: usize) -> String {
    let len = size.saturating_sub(overhead);
    let mut text = format!("total:{size} text:{len} overhead:{overhead} ");
    while text.len() < len {
        text.push('.');
    }
    text
}

impl CommandHandler {
    pub(super) async fn test_msgsize(&self, msg: &ChatMessage) {
        msg.reply("will send a few long messages and print byte length")
            .await;

        let overhead = msg.session.frame_overhead(&msg.reply_to).await;
        for size in FITTING_SIZES {
            msg.reply(&sized_text(size, overhead)).await;
        }
        msg.reply("hopefully the 512 one came through\nwill now send a few of 513 bytes and higher")
            .await;
        for size in OVERSIZED {
            msg.reply(&sized_text(size, overhead)).await;
        }
    }

    pub(super) async fn test_client_panic(&self, msg: &ChatMessage) {
        msg.session.arm_probe_fault();
        info!(server = %msg.session.name(), sender = %msg.sender, "armed probe fault");
        msg.reply("will fault on next liveness probe").await;
    }
}
