//! Live sessions shared across comparison runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::db::connection::DatabaseConnection;
use crate::db::driver::{Connector, DatabaseDriver, SessionSettings, VendorConnector};
use crate::error::ConnectionError;

struct Session {
    id: String,
    connection: DatabaseConnection,
    driver: Arc<dyn DatabaseDriver>,
    refs: AtomicUsize,
}

type Registry = Arc<Mutex<HashMap<String, Arc<Session>>>>;

/// Owns every live session, keyed by [`DatabaseConnection::connection_id`].
#[derive(Clone)]
pub struct ConnectionManager {
    sessions: Registry,
    connector: Arc<dyn Connector>,
    settings: SessionSettings,
}

impl ConnectionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self::with_connector(Arc::new(VendorConnector), settings)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            connector,
            settings,
        }
    }

    /// Returns a handle to the session for `connection`, opening and probing
    /// it first if no live session exists. Callers naming the same logical
    /// connection share one session.
    pub async fn connect(
        &self,
        connection: &DatabaseConnection,
    ) -> Result<ConnectionHandle, ConnectionError> {
        let kind = connection.database_kind()?;
        let id = connection.connection_id();

        if let Some(handle) = self.attach(&id, connection)? {
            debug!(connection = %id, "reusing live session");
            return Ok(handle);
        }

        info!(connection = %id, database_type = %kind, "opening session");
        let driver = self.connector.open(connection, &self.settings).await?;

        let mut sessions = lock(&self.sessions);
        if let Some(existing) = sessions.get(&id).cloned() {
            // Another caller won the race; keep theirs.
            drop(sessions);
            let loser = driver.clone();
            spawn_close(id.clone(), loser);
            return self
                .attach(&id, connection)?
                .ok_or_else(|| ConnectionError::Unreachable {
                    connection: existing.id.clone(),
                    detail: "session closed while connecting".to_string(),
                });
        }
        let session = Arc::new(Session {
            id: id.clone(),
            connection: connection.clone(),
            driver,
            refs: AtomicUsize::new(1),
        });
        sessions.insert(id, session.clone());
        Ok(ConnectionHandle {
            session,
            registry: self.sessions.clone(),
        })
    }

    fn attach(
        &self,
        id: &str,
        connection: &DatabaseConnection,
    ) -> Result<Option<ConnectionHandle>, ConnectionError> {
        let sessions = lock(&self.sessions);
        let Some(session) = sessions.get(id) else {
            return Ok(None);
        };
        if session.connection.password != connection.password {
            return Err(ConnectionError::AuthRejected {
                connection: id.to_string(),
                detail: "credentials differ from the live session".to_string(),
            });
        }
        session.refs.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ConnectionHandle {
            session: session.clone(),
            registry: self.sessions.clone(),
        }))
    }

    /// New reference to a live session by id.
    pub fn get(&self, id: &str) -> Option<ConnectionHandle> {
        let sessions = lock(&self.sessions);
        let session = sessions.get(id)?;
        session.refs.fetch_add(1, Ordering::SeqCst);
        Some(ConnectionHandle {
            session: session.clone(),
            registry: self.sessions.clone(),
        })
    }

    /// New reference to the first live session on database `name`.
    pub fn find_by_database(&self, name: &str) -> Option<ConnectionHandle> {
        let sessions = lock(&self.sessions);
        let mut matches = sessions
            .values()
            .filter(|session| session.connection.database_name == name)
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        let session = matches.first()?;
        session.refs.fetch_add(1, Ordering::SeqCst);
        Some(ConnectionHandle {
            session: (*session).clone(),
            registry: self.sessions.clone(),
        })
    }

    /// Releases `handle`; the session closes when its last reference goes.
    pub fn release(&self, handle: ConnectionHandle) {
        drop(handle);
    }

    pub fn ref_count(&self, id: &str) -> usize {
        lock(&self.sessions)
            .get(id)
            .map(|session| session.refs.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn connection_ids(&self) -> Vec<String> {
        let mut ids = lock(&self.sessions).keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }
}

/// One counted reference to a live session. Cloning adds a reference and
/// dropping removes one.
pub struct ConnectionHandle {
    session: Arc<Session>,
    registry: Registry,
}

impl ConnectionHandle {
    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.session.connection
    }

    pub fn driver(&self) -> Arc<dyn DatabaseDriver> {
        self.session.driver.clone()
    }
}

impl Clone for ConnectionHandle {
    fn clone(&self) -> Self {
        self.session.refs.fetch_add(1, Ordering::SeqCst);
        Self {
            session: self.session.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.session.id)
            .finish()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let mut sessions = lock(&self.registry);
        if self.session.refs.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        let is_current = sessions
            .get(&self.session.id)
            .is_some_and(|live| Arc::ptr_eq(live, &self.session));
        if is_current {
            sessions.remove(&self.session.id);
        }
        drop(sessions);
        info!(connection = %self.session.id, "releasing session");
        spawn_close(self.session.id.clone(), self.session.driver.clone());
    }
}

fn spawn_close(id: String, driver: Arc<dyn DatabaseDriver>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                driver.close().await;
                debug!(connection = %id, "session closed");
            });
        }
        Err(_) => warn!(connection = %id, "no runtime available; session dropped without close"),
    }
}

fn lock(
    registry: &Mutex<HashMap<String, Arc<Session>>>,
) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryConnector, MemoryDatabase};

    fn manager() -> (ConnectionManager, Arc<MemoryConnector>) {
        let connector = Arc::new(MemoryConnector::new());
        connector.register("shop", MemoryDatabase::default());
        let manager =
            ConnectionManager::with_connector(connector.clone(), SessionSettings::default());
        (manager, connector)
    }

    fn conn(password: &str) -> DatabaseConnection {
        DatabaseConnection::from_url(&format!("postgres://app:{}@db:5432/shop", password))
            .expect("url")
    }

    #[tokio::test]
    async fn same_logical_connection_shares_a_session() {
        let (manager, connector) = manager();
        let first = manager.connect(&conn("pw")).await.expect("connect");
        let second = manager.connect(&conn("pw")).await.expect("connect");
        assert_eq!(first.id(), second.id());
        assert_eq!(manager.ref_count(first.id()), 2);
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn session_closes_after_last_release() {
        let (manager, connector) = manager();
        let first = manager.connect(&conn("pw")).await.expect("connect");
        let second = first.clone();
        let id = first.id().to_string();

        manager.release(first);
        assert_eq!(manager.ref_count(&id), 1);
        manager.release(second);
        assert_eq!(manager.ref_count(&id), 0);
        assert!(manager.get(&id).is_none());

        for _ in 0..10 {
            if connector.closed() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn differing_password_is_rejected() {
        let (manager, _) = manager();
        let _live = manager.connect(&conn("pw")).await.expect("connect");
        let err = manager.connect(&conn("other")).await.expect_err("rejected");
        assert!(matches!(err, ConnectionError::AuthRejected { .. }));
    }

    #[tokio::test]
    async fn unknown_database_type_is_unsupported() {
        let (manager, _) = manager();
        let mut connection = conn("pw");
        connection.database_type = "oracle".to_string();
        let err = manager.connect(&connection).await.expect_err("unsupported");
        assert!(matches!(err, ConnectionError::UnsupportedType { .. }));
    }

    #[tokio::test]
    async fn resolves_by_database_name() {
        let (manager, _) = manager();
        let handle = manager.connect(&conn("pw")).await.expect("connect");
        let found = manager.find_by_database("shop").expect("found");
        assert_eq!(found.id(), handle.id());
        assert!(manager.find_by_database("other").is_none());
    }
}
