/// Incident reporting: out-of-band alerts to the owner over the home
/// session.
use tracing::{error, info};

use super::format::BAD;
use super::pool::Pool;
use crate::store::HOME;

impl Pool {
    /// Send `text` to the owner, labelled as an incident.
    ///
    /// Returns whether it was sent. Without an active home session the
    /// incident is only logged.
    pub async fn report_incident(&self, text: &str) -> bool {
        info!(incident = %text, "reporting incident");

        let Some(home) = self.get(HOME).await else {
            error!(incident = %text, "can't report incident, no home session");
            return false;
        };
        if !home.is_active() {
            error!(incident = %text, "can't report incident, home session inactive");
            return false;
        }

        let line = format!("{}: {text}", BAD.bold().paint("incident"));
        match home.send(&self.owner, &line).await {
            Ok(()) => true,
            Err(e) => {
                error!(incident = %text, "failed to deliver incident: {e}");
                false
            }
        }
    }
}
