//! The session directory: the in-memory session collection plus the current selection.
//!
//! Every mutating operation finishes by saving the whole collection and notifying the
//! [`DirectoryObserver`]. A failed save never fails the mutation; it is logged and reported to
//! the observer as a warning, and the in-memory change stands.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::observability::{SESSIONS_CREATED, SESSIONS_DELETED, SESSIONS_RECATEGORIZED};
use crate::store::SessionStore;
use crate::title::infer_title;
use crate::types::{Category, Message, Session, SessionId};

/// A directory shared between the front end and the streaming aggregator.
pub type SharedDirectory = Arc<Mutex<SessionDirectory>>;

/// Callbacks into the presentation layer.
pub trait DirectoryObserver: Send + Sync {
    /// The collection or the current selection changed.
    fn sessions_changed(&self, groups: &[SessionGroup], current: Option<SessionId>) {
        _ = groups;
        _ = current;
    }

    /// Durable state could not be read or written.
    fn persistence_failed(&self, error: &Error) {
        _ = error;
    }
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DirectoryObserver for NoopObserver {}

/// A read-only summary of one session for list display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// The session id.
    pub id: SessionId,
    /// The session title.
    pub title: String,
    /// Number of committed messages.
    pub message_count: usize,
}

/// The sessions of one category, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGroup {
    /// The category shared by every session in the group.
    pub category: Category,
    /// Sessions ordered by descending id.
    pub sessions: Vec<SessionSummary>,
}

/// Owns every session and which one is current.
pub struct SessionDirectory {
    sessions: BTreeMap<SessionId, Session>,
    current: Option<SessionId>,
    last_issued: Option<SessionId>,
    store: SessionStore,
    observer: Box<dyn DirectoryObserver>,
}

impl SessionDirectory {
    /// Loads the collection from `store`.
    ///
    /// The newest session becomes current. If nothing was stored, or the stored state could not
    /// be read, a fresh empty session is created so there is always a current session.
    pub fn open(store: SessionStore, observer: impl DirectoryObserver + 'static) -> Self {
        let observer: Box<dyn DirectoryObserver> = Box::new(observer);
        let loaded = match store.load() {
            Ok(sessions) => sessions,
            Err(err) => {
                tracing::warn!(error = %err, "could not load sessions; starting empty");
                observer.persistence_failed(&err);
                Vec::new()
            }
        };
        let mut sessions = BTreeMap::new();
        for session in loaded {
            if sessions.contains_key(&session.id) {
                tracing::warn!(session_id = %session.id, "dropping duplicate stored session id");
                continue;
            }
            sessions.insert(session.id, session);
        }
        let current = sessions.keys().next_back().copied();
        tracing::info!(sessions = sessions.len(), "loaded session directory");
        let mut directory = Self {
            last_issued: current,
            sessions,
            current,
            store,
            observer,
        };
        if directory.sessions.is_empty() {
            directory.create();
        } else {
            directory.notify();
        }
        directory
    }

    /// Wraps the directory for sharing with the aggregator.
    pub fn shared(self) -> SharedDirectory {
        Arc::new(Mutex::new(self))
    }

    /// Creates an empty session, makes it current and returns its id.
    pub fn create(&mut self) -> SessionId {
        let id = self.next_id();
        self.sessions.insert(id, Session::new(id));
        self.current = Some(id);
        SESSIONS_CREATED.click();
        tracing::info!(session_id = %id, "created session");
        self.persist();
        id
    }

    /// Makes `id` the current session.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such session exists.
    pub fn select(&mut self, id: SessionId) -> Result<&Session> {
        if !self.sessions.contains_key(&id) {
            return Err(Error::not_found("cannot select session", Some(id)));
        }
        if self.current != Some(id) {
            self.current = Some(id);
            tracing::debug!(session_id = %id, "selected session");
            self.notify();
        }
        self.sessions
            .get(&id)
            .ok_or_else(|| Error::not_found("cannot select session", Some(id)))
    }

    /// Deletes `id`. Unknown ids are ignored.
    ///
    /// Deleting the current session promotes the newest remaining session, or creates a new one
    /// when none remain.
    pub fn delete(&mut self, id: SessionId) {
        if self.sessions.remove(&id).is_none() {
            tracing::debug!(session_id = %id, "delete of unknown session ignored");
            return;
        }
        SESSIONS_DELETED.click();
        tracing::info!(session_id = %id, "deleted session");
        if self.current == Some(id) {
            self.current = self.sessions.keys().next_back().copied();
            if self.current.is_none() {
                self.create();
                return;
            }
        }
        self.persist();
    }

    /// Files `id` under `category`. Unknown ids are ignored.
    pub fn recategorize(&mut self, id: SessionId, category: Category) {
        let Some(session) = self.sessions.get_mut(&id) else {
            tracing::debug!(session_id = %id, "recategorize of unknown session ignored");
            return;
        };
        session.category = category;
        SESSIONS_RECATEGORIZED.click();
        tracing::info!(session_id = %id, category = %category, "recategorized session");
        self.persist();
    }

    /// Appends a committed message to `id`.
    ///
    /// The first message of a session also sets its title.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such session exists.
    pub fn append_message(&mut self, id: SessionId, message: Message) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("cannot append message", Some(id)))?;
        if session.messages.is_empty() {
            session.title = infer_title(&message.content);
        }
        session.messages.push(message);
        self.persist();
        Ok(())
    }

    /// Returns the sessions partitioned by category.
    ///
    /// Groups follow [`Category::ALL`] order and empty groups are omitted. Within a group the
    /// newest session comes first.
    pub fn list_grouped(&self) -> Vec<SessionGroup> {
        let mut groups: Vec<SessionGroup> = Category::ALL
            .into_iter()
            .map(|category| SessionGroup {
                category,
                sessions: Vec::new(),
            })
            .collect();
        for session in self.sessions.values().rev() {
            groups[session.category.ordinal()]
                .sessions
                .push(SessionSummary {
                    id: session.id,
                    title: session.title.clone(),
                    message_count: session.messages.len(),
                });
        }
        groups.retain(|group| !group.sessions.is_empty());
        groups
    }

    /// The current session id.
    pub fn current_id(&self) -> Option<SessionId> {
        self.current
    }

    /// The current session.
    pub fn current(&self) -> Option<&Session> {
        self.current.and_then(|id| self.sessions.get(&id))
    }

    /// Looks up a session.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// True if `id` is in the collection.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if there are no sessions. Only observable transiently inside an operation.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The stored display name used to personalize the backend instruction.
    pub fn display_name(&self) -> Option<String> {
        match self.store.display_name() {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!(error = %err, "could not read display name");
                self.observer.persistence_failed(&err);
                None
            }
        }
    }

    /// Stores or clears the display name.
    pub fn set_display_name(&mut self, name: Option<&str>) {
        if let Err(err) = self.store.set_display_name(name) {
            tracing::warn!(error = %err, "could not store display name");
            self.observer.persistence_failed(&err);
        }
    }

    fn next_id(&mut self) -> SessionId {
        let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).max(0) as u64;
        let floor = self
            .last_issued
            .into_iter()
            .chain(self.sessions.keys().next_back().copied())
            .map(|id| id.value().saturating_add(1))
            .max()
            .unwrap_or(0);
        let id = SessionId::new(now_ms.max(floor));
        self.last_issued = Some(id);
        id
    }

    fn persist(&mut self) {
        let sessions: Vec<Session> = self.sessions.values().cloned().collect();
        if let Err(err) = self.store.save(&sessions) {
            tracing::warn!(error = %err, "could not save sessions; changes kept in memory");
            self.observer.persistence_failed(&err);
        }
        self.notify();
    }

    fn notify(&self) {
        self.observer
            .sessions_changed(&self.list_grouped(), self.current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStorage, SESSIONS_KEY, Storage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default, Clone)]
    struct CountingObserver {
        changes: Arc<AtomicUsize>,
        failures: Arc<AtomicUsize>,
    }

    impl DirectoryObserver for CountingObserver {
        fn sessions_changed(&self, _: &[SessionGroup], _: Option<SessionId>) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }

        fn persistence_failed(&self, _: &Error) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn get(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _: &str, _: &str) -> Result<()> {
            Err(Error::io(
                "quota exceeded",
                std::io::Error::new(std::io::ErrorKind::Other, "quota exceeded"),
            ))
        }

        fn remove(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn open_empty() -> SessionDirectory {
        SessionDirectory::open(SessionStore::in_memory(), NoopObserver)
    }

    fn assert_one_current(directory: &SessionDirectory) {
        assert!(!directory.is_empty());
        let current = directory.current_id().expect("a current session");
        assert!(directory.contains(current));
    }

    #[test]
    fn empty_store_synthesizes_a_session() {
        let directory = open_empty();
        assert_eq!(directory.len(), 1);
        assert_one_current(&directory);
        assert!(directory.current().unwrap().is_empty());
    }

    #[test]
    fn open_selects_newest_stored_session() {
        let blob = r#"[{"id": 5, "title": "a", "messages": []},
                       {"id": 9, "title": "b", "messages": []},
                       {"id": 7, "title": "c", "messages": []}]"#;
        let store = SessionStore::new(MemoryStorage::with_value(SESSIONS_KEY, blob));
        let directory = SessionDirectory::open(store, NoopObserver);
        assert_eq!(directory.len(), 3);
        assert_eq!(directory.current_id(), Some(SessionId::new(9)));
    }

    #[test]
    fn create_issues_increasing_ids_and_selects() {
        let mut directory = open_empty();
        let first = directory.current_id().unwrap();
        let second = directory.create();
        let third = directory.create();
        assert!(first < second && second < third);
        assert_eq!(directory.current_id(), Some(third));
    }

    #[test]
    fn select_unknown_is_not_found() {
        let mut directory = open_empty();
        let before = directory.current_id();
        let err = directory.select(SessionId::new(1)).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(directory.current_id(), before);
    }

    #[test]
    fn delete_current_promotes_newest_remaining() {
        let mut directory = open_empty();
        let a = directory.current_id().unwrap();
        let b = directory.create();
        let c = directory.create();
        directory.select(b).unwrap();
        directory.delete(b);
        assert_eq!(directory.current_id(), Some(c));
        directory.delete(c);
        assert_eq!(directory.current_id(), Some(a));
    }

    #[test]
    fn delete_last_session_synthesizes_new_one() {
        let mut directory = open_empty();
        let only = directory.current_id().unwrap();
        directory.delete(only);
        assert_eq!(directory.len(), 1);
        assert_one_current(&directory);
        assert_ne!(directory.current_id(), Some(only));
    }

    #[test]
    fn delete_unknown_is_noop() {
        let mut directory = open_empty();
        let before = directory.current_id();
        directory.delete(SessionId::new(3));
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.current_id(), before);
    }

    #[test]
    fn delete_non_current_keeps_selection() {
        let mut directory = open_empty();
        let a = directory.current_id().unwrap();
        let b = directory.create();
        directory.delete(a);
        assert_eq!(directory.current_id(), Some(b));
    }

    #[test]
    fn random_walk_keeps_exactly_one_current() {
        let mut directory = open_empty();
        let mut ids = vec![directory.current_id().unwrap()];
        for step in 0..60u64 {
            match step % 5 {
                0 | 3 => ids.push(directory.create()),
                1 => {
                    let target = ids[(step as usize * 7) % ids.len()];
                    let _ = directory.select(target);
                }
                _ => {
                    let target = ids[(step as usize * 3) % ids.len()];
                    directory.delete(target);
                }
            }
            assert_one_current(&directory);
            ids = directory
                .list_grouped()
                .into_iter()
                .flat_map(|group| group.sessions.into_iter().map(|s| s.id))
                .collect();
        }
    }

    #[test]
    fn recategorize_and_group() {
        let mut directory = open_empty();
        let a = directory.current_id().unwrap();
        let b = directory.create();
        let c = directory.create();
        directory.recategorize(a, Category::Biography);
        directory.recategorize(c, Category::Creed);
        directory.recategorize(SessionId::new(1), Category::Creed);

        let groups = directory.list_grouped();
        let shape: Vec<(Category, Vec<SessionId>)> = groups
            .iter()
            .map(|g| (g.category, g.sessions.iter().map(|s| s.id).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (Category::Creed, vec![c]),
                (Category::Biography, vec![a]),
                (Category::Uncategorized, vec![b]),
            ]
        );
    }

    #[test]
    fn groups_are_newest_first() {
        let mut directory = open_empty();
        let a = directory.current_id().unwrap();
        let b = directory.create();
        let c = directory.create();
        let groups = directory.list_grouped();
        assert_eq!(groups.len(), 1);
        let ids: Vec<SessionId> = groups[0].sessions.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![c, b, a]);
    }

    #[test]
    fn first_message_sets_title_once() {
        let mut directory = open_empty();
        let id = directory.current_id().unwrap();
        let long = "x".repeat(40);
        directory.append_message(id, Message::user(long.clone())).unwrap();
        directory
            .append_message(id, Message::assistant("reply", Vec::new()))
            .unwrap();
        directory
            .append_message(id, Message::user("second question"))
            .unwrap();
        let session = directory.get(id).unwrap();
        assert_eq!(session.title, format!("{}...", &long[..30]));
        assert_eq!(session.message_count(), 3);
    }

    #[test]
    fn append_to_unknown_is_not_found() {
        let mut directory = open_empty();
        let err = directory
            .append_message(SessionId::new(1), Message::user("hi"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn mutations_are_persisted() {
        let store = SessionStore::in_memory();
        let mut directory = SessionDirectory::open(store, NoopObserver);
        let id = directory.current_id().unwrap();
        directory.append_message(id, Message::user("hello")).unwrap();
        directory.recategorize(id, Category::Tradition);
        let saved = directory.store.load().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].category, Category::Tradition);
        assert_eq!(saved[0].messages, vec![Message::user("hello")]);
    }

    #[test]
    fn failed_save_is_a_warning_not_an_error() {
        let observer = CountingObserver::default();
        let mut directory =
            SessionDirectory::open(SessionStore::new(FailingStorage), observer.clone());
        let id = directory.current_id().unwrap();
        assert!(directory.append_message(id, Message::user("hi")).is_ok());
        assert_eq!(directory.get(id).unwrap().message_count(), 1);
        assert!(observer.failures.load(Ordering::SeqCst) >= 2);
        assert!(observer.changes.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn display_name_passthrough() {
        let mut directory = open_empty();
        assert_eq!(directory.display_name(), None);
        directory.set_display_name(Some("Yusuf"));
        assert_eq!(directory.display_name().as_deref(), Some("Yusuf"));
    }
}
