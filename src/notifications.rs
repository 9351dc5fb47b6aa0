// =============================================================================
// Notification Center — push-only, dismissible, auto-expiring notices
// =============================================================================
//
// Every stream owner reports user-visible outcomes through
// `NotificationSink::notify`. The center keeps a capped list of recent
// notifications; each one can be dismissed by id and expires after its TTL.
// =============================================================================

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::types::Severity;

/// Maximum number of notifications retained.
const MAX_NOTIFICATIONS: usize = 50;

/// Destination for user-visible notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, severity: Severity, title: &str, detail: Option<&str>);
}

/// A single notification as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` means the notification stays until dismissed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory notification store.
pub struct NotificationCenter {
    items: RwLock<Vec<Notification>>,
    ttl: Option<Duration>,
}

impl NotificationCenter {
    /// Create a center whose notifications expire after `ttl` (`None` keeps
    /// them until dismissed).
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            ttl,
        }
    }

    /// Push a notification and return its id.
    pub fn push(&self, severity: Severity, title: &str, detail: Option<&str>) -> String {
        let now = Utc::now();
        let expires_at = self
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);

        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            severity,
            title: title.to_string(),
            detail: detail.map(str::to_string),
            created_at: now,
            expires_at,
        };
        let id = notification.id.clone();

        let detail = detail.unwrap_or("");
        match severity {
            Severity::Error => error!(title, detail, "notification"),
            Severity::Warning => warn!(title, detail, "notification"),
            Severity::Info | Severity::Success => info!(title, detail, %severity, "notification"),
        }

        let mut items = self.items.write();
        items.push(notification);
        while items.len() > MAX_NOTIFICATIONS {
            items.remove(0);
        }
        id
    }

    /// Remove a notification. Returns `false` if the id is unknown.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|n| n.id != id);
        items.len() != before
    }

    /// Drop expired notifications and return the remaining ones, oldest first.
    pub fn active(&self) -> Vec<Notification> {
        let now = Utc::now();
        let mut items = self.items.write();
        items.retain(|n| !n.is_expired(now));
        items.clone()
    }

    /// Every retained notification, including expired ones not yet pruned.
    #[cfg(test)]
    pub fn all(&self) -> Vec<Notification> {
        self.items.read().clone()
    }
}

impl NotificationSink for NotificationCenter {
    fn notify(&self, severity: Severity, title: &str, detail: Option<&str>) {
        self.push(severity, title, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_dismiss() {
        let center = NotificationCenter::new(None);
        let id = center.push(Severity::Error, "History unavailable", Some("502"));
        center.push(Severity::Info, "Symbol selected", None);
        assert_eq!(center.active().len(), 2);

        assert!(center.dismiss(&id));
        assert!(!center.dismiss(&id));

        let active = center.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Symbol selected");
    }

    #[test]
    fn expired_notifications_are_pruned() {
        let center = NotificationCenter::new(Some(Duration::ZERO));
        center.push(Severity::Info, "gone", None);
        assert_eq!(center.all().len(), 1);
        assert!(center.active().is_empty());
        assert!(center.all().is_empty());
    }

    #[test]
    fn capacity_is_capped() {
        let center = NotificationCenter::new(None);
        for i in 0..(MAX_NOTIFICATIONS + 5) {
            center.push(Severity::Info, &format!("n{i}"), None);
        }
        let all = center.all();
        assert_eq!(all.len(), MAX_NOTIFICATIONS);
        assert_eq!(all[0].title, "n5");
    }

    #[test]
    fn sink_records_detail() {
        let center = NotificationCenter::new(None);
        center.notify(Severity::Success, "Analysis complete", Some("2 signal(s) detected"));
        let active = center.active();
        assert_eq!(active[0].severity, Severity::Success);
        assert_eq!(active[0].detail.as_deref(), Some("2 signal(s) detected"));
    }
}
