//! Change notifications surfaced to collaborators.

/// Something collaborators may need to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A field was added or removed; field lists should be re-fetched.
    SchemaChanged,
    /// Matches were inserted; pagination bounds should be re-derived.
    RowCountChanged,
    ConnectionOpened { key: String },
    ConnectionClosed { key: String },
}

/// Trait for receiving store events.
pub trait StoreObserver: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

/// An observer that logs every event to the `log` crate.
pub struct LogObserver;

impl StoreObserver for LogObserver {
    fn on_event(&self, event: &StoreEvent) {
        match event {
            StoreEvent::SchemaChanged => log::info!("Field list changed"),
            StoreEvent::RowCountChanged => log::debug!("Match count changed"),
            StoreEvent::ConnectionOpened { key } => log::debug!("Connection opened: {key}"),
            StoreEvent::ConnectionClosed { key } => log::debug!("Connection closed: {key}"),
        }
    }
}
