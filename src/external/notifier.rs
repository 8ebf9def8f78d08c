//! Outbound notifications to drivers and customers.
//!
//! Delivery is best effort: a failed notification is logged and never undoes
//! the transition that produced it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Booking, NO_DRIVER_MESSAGE};
use crate::error::{upstream_error, Error};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    /// Tells a driver they have a new ride.
    #[serde(rename_all = "camelCase")]
    RideAssigned {
        driver_id: Uuid,
        booking_id: Uuid,
        pickup_location: String,
        destination: String,
    },
    /// Tells the customer who is coming.
    #[serde(rename_all = "camelCase")]
    DriverAssigned {
        customer_id: Uuid,
        booking_id: Uuid,
        driver_id: Uuid,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    NoDriverAvailable {
        customer_id: Uuid,
        booking_id: Uuid,
        message: String,
    },
    /// Tells a released driver the ride is off.
    #[serde(rename_all = "camelCase")]
    BookingCancelled {
        driver_id: Uuid,
        booking_id: Uuid,
        reason: String,
    },
}

impl Notification {
    pub fn assigned(booking: &Booking, driver_id: Uuid) -> Vec<Self> {
        vec![
            Self::RideAssigned {
                driver_id,
                booking_id: booking.id,
                pickup_location: booking.pickup_location.clone(),
                destination: booking.destination.clone(),
            },
            Self::DriverAssigned {
                customer_id: booking.customer_id,
                booking_id: booking.id,
                driver_id,
                message: booking.driver_assignment_message.clone().unwrap_or_default(),
            },
        ]
    }

    pub fn unassigned(booking: &Booking) -> Self {
        Self::NoDriverAvailable {
            customer_id: booking.customer_id,
            booking_id: booking.id,
            message: booking
                .driver_assignment_message
                .clone()
                .unwrap_or_else(|| NO_DRIVER_MESSAGE.into()),
        }
    }

    pub fn cancelled(booking: &Booking, driver_id: Uuid) -> Self {
        Self::BookingCancelled {
            driver_id,
            booking_id: booking.id,
            reason: booking.cancellation_reason.clone().unwrap_or_default(),
        }
    }

    pub fn booking_id(&self) -> Uuid {
        match self {
            Self::RideAssigned { booking_id, .. }
            | Self::DriverAssigned { booking_id, .. }
            | Self::NoDriverAvailable { booking_id, .. }
            | Self::BookingCancelled { booking_id, .. } => *booking_id,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), Error>;
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), Error> {
        tracing::info!(booking_id = %notification.booking_id(), "notification: {:?}", notification);

        Ok(())
    }
}

/// POSTs each notification as JSON to a fixed URL. A request that takes
/// longer than `timeout` counts as a failed delivery.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[tracing::instrument(skip(self))]
    async fn notify(&self, notification: Notification) -> Result<(), Error> {
        let res = self
            .client
            .post(&self.url)
            .json(&notification)
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if status_code >= 400 {
            tracing::warn!("webhook responded with {}", status_code);
            return Err(upstream_error());
        }

        Ok(())
    }
}

#[test]
fn notification_wire_format_test() {
    let booking_id = Uuid::new_v4();
    let driver_id = Uuid::new_v4();

    let notification = Notification::BookingCancelled {
        driver_id,
        booking_id,
        reason: "changed plans".into(),
    };

    let value = serde_json::to_value(&notification).unwrap();

    assert_eq!(value["kind"], "BOOKING_CANCELLED");
    assert_eq!(value["bookingId"], booking_id.to_string());
    assert_eq!(value["reason"], "changed plans");
    assert_eq!(notification.booking_id(), booking_id);
}

#[tokio::test]
async fn webhook_gives_up_after_timeout_test() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // accepts connections and never answers
    let server = tokio::spawn(async move {
        let mut open = vec![];
        while let Ok((socket, _)) = listener.accept().await {
            open.push(socket);
        }
    });

    let notifier =
        WebhookNotifier::new(format!("http://{}/hooks", addr), Duration::from_millis(100)).unwrap();

    let notification = Notification::BookingCancelled {
        driver_id: Uuid::new_v4(),
        booking_id: Uuid::new_v4(),
        reason: "changed plans".into(),
    };

    let result = tokio::time::timeout(Duration::from_secs(5), notifier.notify(notification))
        .await
        .expect("webhook call should time out on its own");

    assert!(result.unwrap_err().is_internal());

    server.abort();
}
