//! Connection descriptors and the reference-counted connection registry.
//!
//! A [`ConnectionManager`] hands out `Arc<SharedConnection>` handles keyed by
//! the descriptor's canonical key. The registry itself only keeps `Weak`
//! references, so the backend connection closes as soon as the last handle
//! is dropped.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};

use crate::dialect::{Capabilities, Dialect, probe_sqlite};
use crate::error::ConnectionError;
use crate::events::{StoreEvent, StoreObserver};
use crate::schema;

static ANONYMOUS_MEMORY: AtomicU64 = AtomicU64::new(0);

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    /// SQLite database file.
    File { path: PathBuf },
    /// SQLite in-memory database. Descriptors with the same name share one
    /// connection while it is alive.
    Memory { name: String },
    /// Client/server backend.
    Server {
        dialect: Dialect,
        host: String,
        port: u16,
        database: String,
        user: Option<String>,
        password: Option<String>,
    },
}

impl ConnectionDescriptor {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ConnectionDescriptor::File { path: path.into() }
    }

    /// A private in-memory database that never shares a connection.
    pub fn memory() -> Self {
        let n = ANONYMOUS_MEMORY.fetch_add(1, Ordering::Relaxed);
        ConnectionDescriptor::Memory {
            name: format!("#anonymous-{n}"),
        }
    }

    pub fn named_memory(name: impl Into<String>) -> Self {
        ConnectionDescriptor::Memory { name: name.into() }
    }

    /// Parse a connection URL.
    ///
    /// Accepted forms: `sqlite:///abs/path.db`, `sqlite://rel.db`,
    /// `sqlite:rel.db`, `sqlite::memory:`, `sqlite::memory:name`,
    /// `mysql://[user[:pw]@]host[:port]/db`, `postgres://...`, or a bare
    /// file path.
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(ConnectionError::invalid_descriptor(url, "empty descriptor"));
        }

        let Some((scheme, rest)) = trimmed.split_once(':') else {
            return Ok(Self::file(trimmed));
        };
        let Some(dialect) = Dialect::from_scheme(scheme) else {
            if rest.starts_with("//") {
                return Err(ConnectionError::invalid_descriptor(
                    url,
                    format!("unknown backend '{scheme}'"),
                ));
            }
            // Windows drive letters and other colon-bearing paths
            return Ok(Self::file(trimmed));
        };

        if dialect.is_embedded() {
            if rest == ":memory:" {
                return Ok(Self::memory());
            }
            if let Some(name) = rest.strip_prefix(":memory:") {
                return Ok(Self::named_memory(name));
            }
            let path = rest.strip_prefix("//").unwrap_or(rest);
            if path.is_empty() {
                return Err(ConnectionError::invalid_descriptor(url, "missing file path"));
            }
            return Ok(Self::file(path));
        }

        let Some(authority_and_db) = rest.strip_prefix("//") else {
            return Err(ConnectionError::invalid_descriptor(
                url,
                "expected '//' after the scheme",
            ));
        };
        let (authority, database) = authority_and_db
            .split_once('/')
            .ok_or_else(|| ConnectionError::invalid_descriptor(url, "missing database name"))?;
        let database = database.split(['?', '#']).next().unwrap_or_default();
        if database.is_empty() {
            return Err(ConnectionError::invalid_descriptor(url, "missing database name"));
        }

        let (credentials, host_port) = match authority.rsplit_once('@') {
            Some((creds, host)) => (Some(creds), host),
            None => (None, authority),
        };
        let (user, password) = match credentials {
            Some(creds) => match creds.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(creds.to_string()), None),
            },
            None => (None, None),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConnectionError::invalid_descriptor(url, format!("invalid port '{port}'"))
                })?;
                (host, port)
            }
            None => (host_port, dialect.default_port().unwrap_or_default()),
        };
        if host.is_empty() {
            return Err(ConnectionError::invalid_descriptor(url, "missing host"));
        }

        Ok(ConnectionDescriptor::Server {
            dialect,
            host: host.to_string(),
            port,
            database: database.to_string(),
            user,
            password,
        })
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            ConnectionDescriptor::File { .. } | ConnectionDescriptor::Memory { .. } => {
                Dialect::Sqlite
            }
            ConnectionDescriptor::Server { dialect, .. } => *dialect,
        }
    }

    /// Key identifying the logical database. Two descriptors with the same
    /// key always share one live connection. Credentials are not part of it.
    pub fn canonical_key(&self) -> String {
        match self {
            ConnectionDescriptor::File { path } => {
                format!("sqlite://{}", canonical_path(path).display())
            }
            ConnectionDescriptor::Memory { name } => format!("sqlite::memory:{name}"),
            ConnectionDescriptor::Server {
                dialect,
                host,
                port,
                database,
                ..
            } => format!(
                "{}://{}:{}/{}",
                dialect.scheme(),
                host.to_ascii_lowercase(),
                port,
                database
            ),
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    /// Like the canonical key but with the user name kept, never the password.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDescriptor::File { path } => write!(f, "sqlite://{}", path.display()),
            ConnectionDescriptor::Memory { name } => write!(f, "sqlite::memory:{name}"),
            ConnectionDescriptor::Server {
                dialect,
                host,
                port,
                database,
                user,
                ..
            } => match user {
                Some(user) => write!(f, "{dialect}://{user}@{host}:{port}/{database}"),
                None => write!(f, "{dialect}://{host}:{port}/{database}"),
            },
        }
    }
}

impl std::str::FromStr for ConnectionDescriptor {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    // Not created yet: canonicalize the parent so the key matches the one
    // computed after the file exists.
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

type ObserverList = Arc<Mutex<Vec<Arc<dyn StoreObserver>>>>;

/// A live backend connection shared by every store opened on the same key.
pub struct SharedConnection {
    key: String,
    dialect: Dialect,
    capabilities: Capabilities,
    conn: Mutex<rusqlite::Connection>,
    observers: ObserverList,
}

impl SharedConnection {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// True when probing found a capability missing.
    pub fn is_degraded(&self) -> bool {
        !self.capabilities.is_complete()
    }

    /// Exclusive access to the backend connection for one round-trip.
    pub fn lock(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnection")
            .field("key", &self.key)
            .field("dialect", &self.dialect)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Drop for SharedConnection {
    fn drop(&mut self) {
        log::info!("Closing connection {}", self.key);
        notify(
            &self.observers,
            &StoreEvent::ConnectionClosed {
                key: self.key.clone(),
            },
        );
    }
}

fn notify(observers: &ObserverList, event: &StoreEvent) {
    let observers = observers.lock().unwrap_or_else(PoisonError::into_inner);
    for observer in observers.iter() {
        observer.on_event(event);
    }
}

/// Registry of live connections, one per canonical key.
pub struct ConnectionManager {
    live: Mutex<HashMap<String, Weak<SharedConnection>>>,
    observers: ObserverList,
}

static GLOBAL: LazyLock<ConnectionManager> = LazyLock::new(ConnectionManager::new);

impl ConnectionManager {
    pub fn new() -> Self {
        ConnectionManager {
            live: Mutex::new(HashMap::new()),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static ConnectionManager {
        &GLOBAL
    }

    /// Receive `ConnectionOpened`/`ConnectionClosed` events for connections
    /// opened from now on.
    pub fn subscribe(&self, observer: Arc<dyn StoreObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Open (or reuse) a connection, bootstrapping an empty backend with the
    /// default schema.
    pub fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<SharedConnection>, ConnectionError> {
        self.open_with_bootstrap(descriptor, None)
    }

    pub fn open_url(&self, url: &str) -> Result<Arc<SharedConnection>, ConnectionError> {
        self.open(&ConnectionDescriptor::parse(url)?)
    }

    /// Open (or reuse) a connection. An empty backend is bootstrapped from
    /// `bootstrap` (semicolon-separated DDL) or the default schema. An
    /// already-live connection is returned as-is.
    pub fn open_with_bootstrap(
        &self,
        descriptor: &ConnectionDescriptor,
        bootstrap: Option<&str>,
    ) -> Result<Arc<SharedConnection>, ConnectionError> {
        let key = descriptor.canonical_key();
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = live.get(&key).and_then(Weak::upgrade) {
            log::debug!("Reusing connection {key}");
            return Ok(existing);
        }

        let conn = open_backend(descriptor)?;
        let dialect = descriptor.dialect();

        let capabilities = probe_sqlite(&conn);
        if !capabilities.is_complete() {
            log::error!(
                "Connection {} is missing required capabilities: {}; continuing degraded",
                key,
                capabilities.missing().join(", "),
            );
        }

        if !schema::has_schema(&conn, dialect)? {
            let sql = match bootstrap {
                Some(sql) => sql.to_string(),
                None => schema::default_bootstrap(dialect),
            };
            log::info!("Bootstrapping empty database {key}");
            schema::run_bootstrap(&conn, &sql)?;
        }

        let shared = Arc::new(SharedConnection {
            key: key.clone(),
            dialect,
            capabilities,
            conn: Mutex::new(conn),
            observers: Arc::clone(&self.observers),
        });
        live.insert(key.clone(), Arc::downgrade(&shared));
        drop(live);

        log::info!("Opened connection {key}");
        notify(&self.observers, &StoreEvent::ConnectionOpened { key });
        Ok(shared)
    }

    /// Canonical keys of every connection that is still alive.
    pub fn live_connections(&self) -> Vec<String> {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = live
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn open_backend(descriptor: &ConnectionDescriptor) -> Result<rusqlite::Connection, ConnectionError> {
    match descriptor {
        ConnectionDescriptor::File { path } => {
            let conn = rusqlite::Connection::open(path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
            Ok(conn)
        }
        ConnectionDescriptor::Memory { .. } => {
            let conn = rusqlite::Connection::open_in_memory()?;
            conn.execute_batch("PRAGMA foreign_keys=ON;")?;
            Ok(conn)
        }
        ConnectionDescriptor::Server { dialect, .. } => {
            Err(ConnectionError::DriverUnavailable(*dialect))
        }
    }
}
