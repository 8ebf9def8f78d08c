use std::time::Duration;

use tokio::task::JoinHandle;

use super::Engine;

use crate::{api::BookingAPI, auth::User};

/// Periodically moves bookings that have been PENDING longer than the
/// configured timeout to UNASSIGNED.
pub fn spawn(engine: Engine, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let system = User::new_system_user();
        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;

            if let Err(err) = engine.expire_pending(system.clone()).await {
                tracing::error!("pending sweep failed: {}", err);
            }
        }
    })
}
