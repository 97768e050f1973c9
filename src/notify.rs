//! Notification capability: how triggered alerts reach the user.
//!
//! The engine only decides *that* a notification fires; sinks decide how.

use crate::alerts::format_alert_message;
use crate::audio::{self, AlertSound};
use crate::models::TriggeredAlert;
use async_trait::async_trait;
use tracing::info;

/// Receives triggered alerts. Fire-and-forget: the engine never reads a
/// result back, and a sink must not block the refresh loop.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, triggered: &TriggeredAlert);
}

/// Prints the alert message and optionally rings the terminal bell.
pub struct ConsoleSink {
    audio: bool,
}

impl ConsoleSink {
    pub fn new(audio: bool) -> Self {
        Self { audio }
    }
}

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn notify(&self, triggered: &TriggeredAlert) {
        info!(
            coin = %triggered.alert.coin,
            kind = %triggered.alert.kind,
            target = triggered.alert.target_price,
            price = triggered.current_price,
            "price alert triggered"
        );
        println!("{}", format_alert_message(triggered));

        if self.audio {
            audio::play_sound_async(AlertSound::for_kind(triggered.alert.kind));
        }
    }
}

/// Sink that drops everything; for tests and headless runs.
#[derive(Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, _triggered: &TriggeredAlert) {}
}
