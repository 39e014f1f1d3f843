//! Bridge to the browser host's side effects.
//!
//! The engine never talks to a socket directly. Rule installs, notifications
//! and forced reloads go through [`HostActions`]; the daemon's implementation
//! publishes them as [`HostDirective`]s that the server forwards to every
//! subscribed host connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use webtime_core::{Reminder, RuleSet};
use webtime_protocol::DaemonMessage;

/// Side effect requested from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostDirective {
    /// Replace every installed redirect rule with this set.
    InstallRules(RuleSet),
    ShowNotification(Reminder),
    ReloadTab { tab_id: i64 },
}

impl From<HostDirective> for DaemonMessage {
    fn from(directive: HostDirective) -> Self {
        match directive {
            HostDirective::InstallRules(rules) => DaemonMessage::InstallRules { rules },
            HostDirective::ShowNotification(reminder) => DaemonMessage::notification(reminder),
            HostDirective::ReloadTab { tab_id } => DaemonMessage::ReloadTab { tab_id },
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// Nobody is listening; the directive was dropped.
    #[error("no host connected")]
    NotConnected,
}

/// Number of hosts currently subscribed to directives.
///
/// Shared between the engine's [`BroadcastHost`] and whoever owns the
/// subscriber list, which keeps it equal to the list's length.
#[derive(Debug, Clone, Default)]
pub struct HostPresence(Arc<AtomicUsize>);

impl HostPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, subscribers: usize) {
        self.0.store(subscribers, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborator interface for the redirect, notification and tab mechanisms.
pub trait HostActions: Send {
    /// Atomically replaces the installed rule set.
    fn install_rules(&mut self, rules: &RuleSet) -> Result<(), HostError>;

    fn notify(&mut self, reminder: &Reminder) -> Result<(), HostError>;

    fn reload_tab(&mut self, tab_id: i64) -> Result<(), HostError>;
}

/// Publishes directives on a broadcast channel.
///
/// A directive only counts as delivered while at least one host is
/// subscribed; otherwise it is dropped and the caller sees `NotConnected`.
#[derive(Clone)]
pub struct BroadcastHost {
    sender: broadcast::Sender<HostDirective>,
    presence: HostPresence,
}

impl BroadcastHost {
    pub fn new(sender: broadcast::Sender<HostDirective>, presence: HostPresence) -> Self {
        Self { sender, presence }
    }

    fn publish(&self, directive: HostDirective) -> Result<(), HostError> {
        if self.presence.count() == 0 {
            return Err(HostError::NotConnected);
        }
        match self.sender.send(directive) {
            Ok(receivers) => {
                debug!(receivers, "Published host directive");
                Ok(())
            }
            Err(_) => Err(HostError::NotConnected),
        }
    }
}

impl HostActions for BroadcastHost {
    fn install_rules(&mut self, rules: &RuleSet) -> Result<(), HostError> {
        self.publish(HostDirective::InstallRules(rules.clone()))
    }

    fn notify(&mut self, reminder: &Reminder) -> Result<(), HostError> {
        self.publish(HostDirective::ShowNotification(reminder.clone()))
    }

    fn reload_tab(&mut self, tab_id: i64) -> Result<(), HostError> {
        self.publish(HostDirective::ReloadTab { tab_id })
    }
}
