//! Asynchronous notifications and warnings.
use std::collections::VecDeque;

use crate::{
    common::ByteStr,
    postgres::{DbError, backend::NotificationResponse},
};

/// A `NOTIFY` delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The process ID of the notifying backend process.
    pub process_id: u32,
    pub channel: ByteStr,
    pub payload: ByteStr,
}

impl From<NotificationResponse> for Notification {
    fn from(n: NotificationResponse) -> Self {
        Self { process_id: n.process_id, channel: n.channel, payload: n.payload }
    }
}

/// Queued notices and notifications, drained only on demand.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    warnings: Vec<DbError>,
    notifications: VecDeque<Notification>,
}

impl Inbox {
    pub(crate) fn push_warning(&mut self, warning: DbError) {
        self.warnings.push(warning);
    }

    pub(crate) fn push_notification(&mut self, notification: Notification) {
        self.notifications.push_back(notification);
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<DbError> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    pub(crate) fn notification_count(&self) -> usize {
        self.notifications.len()
    }
}
