//! Name-to-channel lookup.

use crate::channel::{validate_channel_name, MessageChannel};
use crate::error::ChannelError;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A concurrent registry of channels indexed by name.
///
/// The registry holds shared handles only; channel lifecycle stays with
/// the code that created the channel.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<dyn MessageChannel>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::IllegalArgument`] when the name is invalid
    /// or already taken.
    pub fn register(&self, channel: Arc<dyn MessageChannel>) -> Result<(), ChannelError> {
        let name = channel.name().to_string();
        validate_channel_name(&name)
            .map_err(|reason| ChannelError::IllegalArgument(reason.to_string()))?;

        match self.channels.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ChannelError::IllegalArgument(
                format!("channel '{name}' is already registered"),
            )),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(channel);
                debug!(channel = %name, "Channel registered");
                Ok(())
            }
        }
    }

    /// Look up a channel by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn MessageChannel>> {
        self.channels.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Remove a channel by name, returning its handle.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn MessageChannel>> {
        let removed = self.channels.remove(name).map(|(_, channel)| channel);
        if removed.is_some() {
            debug!(channel = %name, "Channel removed");
        }
        removed
    }

    /// Check whether a channel is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Get all registered channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get the number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
