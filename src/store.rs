//! Comment persistence.
//!
//! [`CommentStore`] is the narrow interface the request handlers use. Its
//! methods are synchronous and may block (disk I/O); handlers reach it
//! through [`Context::store`](crate::Context::store), which moves each call
//! onto tokio's blocking pool.
//!
//! [`FileStore`] is the bundled implementation, an embedded redb database.
//! Every mutation runs in a single write transaction, so a failed commit
//! leaves nothing behind.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadOnlyTable, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ── Model ─────────────────────────────────────────────────────────────────────

/// Moderation state of a comment.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Public,
    Pending,
    /// Removed, but kept as an empty stub because it still has replies.
    Deleted,
}

impl Mode {
    /// Numeric wire form: 1, 2, 4.
    pub fn bits(self) -> u8 {
        match self {
            Self::Public  => 1,
            Self::Pending => 2,
            Self::Deleted => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub parent: Option<i64>,
    pub created: DateTime<Utc>,
    pub modified: Option<DateTime<Utc>>,
    pub text: String,
    pub author: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub remote_addr: Option<String>,
    pub mode: Mode,
}

/// Input for [`CommentStore::add`].
#[derive(Clone, Debug)]
pub struct NewComment {
    pub text: String,
    pub author: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub parent: Option<i64>,
    pub remote_addr: Option<String>,
    pub mode: Mode,
    /// Defaults to now. Set by importers to keep original timestamps.
    pub created: Option<DateTime<Utc>>,
}

impl NewComment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author: None,
            email: None,
            website: None,
            parent: None,
            remote_addr: None,
            mode: Mode::Public,
            created: None,
        }
    }
}

/// Fields to replace on [`CommentStore::update`]. `None` keeps the old value.
#[derive(Clone, Debug, Default)]
pub struct CommentUpdate {
    pub text: Option<String>,
    pub author: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("comment {id} not found in thread `{path}`")]
    NotFound { path: String, id: i64 },

    #[error("parent comment {0} does not exist in this thread")]
    InvalidParent(i64),

    #[error("database: {0}")]
    Database(#[from] redb::Error),

    #[error("corrupt comment record: {0}")]
    Serde(#[from] serde_json::Error),
}

macro_rules! from_redb {
    ($($err:ty),*) => {$(
        impl From<$err> for StoreError {
            fn from(e: $err) -> Self {
                Self::Database(e.into())
            }
        }
    )*};
}

from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

impl StoreError {
    fn not_found(path: &str, id: i64) -> Self {
        Self::NotFound { path: path.to_owned(), id }
    }
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// Persistence, threading and moderation state for comments.
pub trait CommentStore: Send + Sync + 'static {
    fn add(&self, path: &str, comment: NewComment) -> Result<Comment, StoreError>;

    fn get(&self, path: &str, id: i64) -> Result<Comment, StoreError>;

    /// Comments of `path` whose mode is in `modes`, ordered by id.
    fn retrieve(&self, path: &str, modes: &[Mode]) -> Result<Vec<Comment>, StoreError>;

    fn update(&self, path: &str, id: i64, update: CommentUpdate) -> Result<Comment, StoreError>;

    /// Deletes a comment. One with replies becomes a [`Mode::Deleted`] stub,
    /// which is returned; otherwise it is removed and `None` is returned.
    fn delete(&self, path: &str, id: i64) -> Result<Option<Comment>, StoreError>;

    /// Makes a pending comment public.
    fn activate(&self, path: &str, id: i64) -> Result<Comment, StoreError>;

    /// The newest comments in `mode` across all threads, with their thread.
    fn recent(&self, mode: Mode, limit: usize) -> Result<Vec<(String, Comment)>, StoreError>;
}

// ── FileStore ─────────────────────────────────────────────────────────────────

/// JSON-encoded comments keyed by `(thread, id)`.
const COMMENTS: TableDefinition<(&str, i64), &[u8]> = TableDefinition::new("comments");
const COUNTERS: TableDefinition<&str, i64> = TableDefinition::new("counters");
const LAST_ID: &str = "last_id";

type Comments<'txn> = Table<'txn, (&'static str, i64), &'static [u8]>;
type Counters<'txn> = Table<'txn, &'static str, i64>;

/// Comment store on an embedded redb database.
pub struct FileStore {
    db: Arc<Database>,
}

impl FileStore {
    /// Nothing is written anywhere. Contents vanish with the store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db)
    }

    /// Opens the database at `file`, creating it if needed.
    pub fn open(file: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = file.as_ref();
        let store = Self::init(Database::create(file)?)?;
        info!(file = %file.display(), "comment database opened");
        Ok(store)
    }

    fn init(db: Database) -> Result<Self, StoreError> {
        let store = Self { db: Arc::new(db) };
        // Create both tables up front so read transactions always find them.
        store.write(|_, _| Ok(()))?;
        Ok(store)
    }

    /// Runs `f` in one write transaction and commits only if it succeeds.
    /// An error drops the transaction, which rolls back everything `f` did.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut Comments<'_>, &mut Counters<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let txn = self.db.begin_write()?;
        let out = {
            let mut comments = txn.open_table(COMMENTS)?;
            let mut counters = txn.open_table(COUNTERS)?;
            f(&mut comments, &mut counters)?
        };
        txn.commit()?;
        debug!("comment transaction committed");
        Ok(out)
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&ReadOnlyTable<(&'static str, i64), &'static [u8]>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let txn = self.db.begin_read()?;
        let comments = txn.open_table(COMMENTS)?;
        f(&comments)
    }
}

fn load(
    table: &impl ReadableTable<(&'static str, i64), &'static [u8]>,
    path: &str,
    id: i64,
) -> Result<Option<Comment>, StoreError> {
    match table.get((path, id))? {
        Some(row) => Ok(Some(serde_json::from_slice(row.value())?)),
        None => Ok(None),
    }
}

fn thread(
    table: &impl ReadableTable<(&'static str, i64), &'static [u8]>,
    path: &str,
) -> Result<BTreeMap<i64, Comment>, StoreError> {
    let mut comments = BTreeMap::new();
    for row in table.range((path, i64::MIN)..=(path, i64::MAX))? {
        let (key, value) = row?;
        comments.insert(key.value().1, serde_json::from_slice(value.value())?);
    }
    Ok(comments)
}

fn save(table: &mut Comments<'_>, path: &str, comment: &Comment) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(comment)?;
    table.insert((path, comment.id), bytes.as_slice())?;
    Ok(())
}

/// Loads a comment that can still be changed, i.e. exists and is not a stub.
fn live(table: &Comments<'_>, path: &str, id: i64) -> Result<Comment, StoreError> {
    load(table, path, id)?
        .filter(|c| c.mode != Mode::Deleted)
        .ok_or_else(|| StoreError::not_found(path, id))
}

impl CommentStore for FileStore {
    fn add(&self, path: &str, new: NewComment) -> Result<Comment, StoreError> {
        self.write(|comments, counters| {
            if let Some(parent) = new.parent {
                if load(&*comments, path, parent)?.is_none() {
                    return Err(StoreError::InvalidParent(parent));
                }
            }

            let id = counters.get(LAST_ID)?.map_or(0, |v| v.value()) + 1;
            counters.insert(LAST_ID, id)?;

            let comment = Comment {
                id,
                parent: new.parent,
                created: new.created.unwrap_or_else(Utc::now),
                modified: None,
                text: new.text,
                author: new.author,
                email: new.email,
                website: new.website,
                remote_addr: new.remote_addr,
                mode: new.mode,
            };
            save(comments, path, &comment)?;
            Ok(comment)
        })
    }

    fn get(&self, path: &str, id: i64) -> Result<Comment, StoreError> {
        self.read(|comments| load(comments, path, id)?.ok_or_else(|| StoreError::not_found(path, id)))
    }

    fn retrieve(&self, path: &str, modes: &[Mode]) -> Result<Vec<Comment>, StoreError> {
        self.read(|comments| {
            Ok(thread(comments, path)?.into_values().filter(|c| modes.contains(&c.mode)).collect())
        })
    }

    fn update(&self, path: &str, id: i64, update: CommentUpdate) -> Result<Comment, StoreError> {
        self.write(|comments, _| {
            let mut comment = live(comments, path, id)?;
            if let Some(text) = update.text {
                comment.text = text;
            }
            if let Some(author) = update.author {
                comment.author = Some(author);
            }
            if let Some(website) = update.website {
                comment.website = Some(website);
            }
            comment.modified = Some(Utc::now());
            save(comments, path, &comment)?;
            Ok(comment)
        })
    }

    fn delete(&self, path: &str, id: i64) -> Result<Option<Comment>, StoreError> {
        self.write(|comments, _| {
            let mut siblings = thread(&*comments, path)?;
            let Some(target) = siblings.get(&id) else {
                return Err(StoreError::not_found(path, id));
            };

            if siblings.values().any(|c| c.parent == Some(id)) {
                let mut stub = target.clone();
                stub.text.clear();
                stub.author = None;
                stub.email = None;
                stub.website = None;
                stub.mode = Mode::Deleted;
                stub.modified = Some(Utc::now());
                save(comments, path, &stub)?;
                return Ok(Some(stub));
            }

            // Remove the leaf, then any deleted ancestors it leaves childless.
            let mut next = Some(id);
            while let Some(current) = next {
                let Some(removed) = siblings.remove(&current) else { break };
                comments.remove((path, current))?;
                next = removed.parent.filter(|parent| {
                    siblings.get(parent).is_some_and(|p| p.mode == Mode::Deleted)
                        && !siblings.values().any(|c| c.parent == Some(*parent))
                });
            }
            Ok(None)
        })
    }

    fn activate(&self, path: &str, id: i64) -> Result<Comment, StoreError> {
        self.write(|comments, _| {
            let mut comment = live(comments, path, id)?;
            comment.mode = Mode::Public;
            save(comments, path, &comment)?;
            Ok(comment)
        })
    }

    fn recent(&self, mode: Mode, limit: usize) -> Result<Vec<(String, Comment)>, StoreError> {
        let mut found = self.read(|comments| {
            let mut found = Vec::new();
            for row in comments.iter()? {
                let (key, value) = row?;
                let comment: Comment = serde_json::from_slice(value.value())?;
                if comment.mode == mode {
                    found.push((key.value().0.to_owned(), comment));
                }
            }
            Ok(found)
        })?;
        found.sort_by(|(_, a), (_, b)| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
        found.truncate(limit);
        Ok(found)
    }
}
