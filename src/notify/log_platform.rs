//! Notification platform for headless hosts: every notification becomes a
//! structured log line. Permission is always granted.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{error, info, warn};

use super::{DeliveryChannel, NotificationOptions, NotificationPlatform, Permission, Severity};

#[derive(Debug, Default)]
pub struct LogNotificationPlatform;

impl NotificationPlatform for LogNotificationPlatform {
    fn current_permission(&self) -> Option<Permission> {
        Some(Permission::Granted)
    }

    fn request_permission(&self) -> BoxFuture<'_, Permission> {
        async { Permission::Granted }.boxed()
    }

    fn background_channel_available(&self) -> bool {
        false
    }

    fn show<'a>(
        &'a self,
        channel: DeliveryChannel,
        title: &'a str,
        options: &'a NotificationOptions,
    ) -> BoxFuture<'a, Result<(), String>> {
        async move {
            match options.severity {
                Severity::Info => {
                    info!(channel = ?channel, tag = %options.tag, "{title}: {}", options.body)
                }
                Severity::Warning => {
                    warn!(channel = ?channel, tag = %options.tag, "{title}: {}", options.body)
                }
                Severity::Error => {
                    error!(channel = ?channel, tag = %options.tag, "{title}: {}", options.body)
                }
            }
            Ok(())
        }
        .boxed()
    }
}
