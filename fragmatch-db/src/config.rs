//! Per-store options.

/// Behaviour switches for a [`MatchStore`](crate::MatchStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Append a history record for every attribute write.
    pub history_enabled: bool,
    /// User recorded in history entries.
    pub user_id: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            history_enabled: true,
            user_id: None,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(mut self, enabled: bool) -> Self {
        self.history_enabled = enabled;
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
