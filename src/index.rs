use crate::core::{MirrorError, Result, Value};
use crate::entity::{Entity, Id};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Projection of an entity onto an index value.
pub type IndexGetter<E> = Arc<dyn Fn(&E) -> Value + Send + Sync>;

/// Maps a lookup value to backing-store (field, value) pairs for the
/// emergency fallback query issued on an in-memory miss.
pub type EmergencyQuery = Arc<dyn Fn(&Value) -> Vec<(String, Value)> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// At most one entity id per value; a second distinct id is an error.
    Unique,
    /// Any number of entities per value, keyed by id inside the bucket.
    Multi,
}

/// Outcome of an in-memory bucket probe. `Miss` (bucket absent or empty) is
/// what arms the emergency fallback; a present bucket whose entries are all
/// filtered out by the predicate is still a `Hit`.
#[derive(Debug)]
pub(crate) enum Lookup<T> {
    Miss,
    Hit(T),
}

/// Named lookup structure over one table's entities.
///
/// Buckets are guarded by a single `RwLock` per index: the table write lock
/// serializes writers, readers take the read guard for the duration of one
/// bucket iteration. Bucket entries are id-ordered so iteration order is
/// deterministic.
pub struct Index<E: Entity> {
    name: String,
    kind: IndexKind,
    getter: IndexGetter<E>,
    emergency: Option<EmergencyQuery>,
    buckets: RwLock<HashMap<Value, BTreeMap<Id, E>>>,
}

impl<E: Entity> Index<E> {
    pub fn new(
        name: impl Into<String>,
        kind: IndexKind,
        getter: impl Fn(&E) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            getter: Arc::new(getter),
            emergency: None,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_emergency(
        mut self,
        emergency: impl Fn(&Value) -> Vec<(String, Value)> + Send + Sync + 'static,
    ) -> Self {
        self.emergency = Some(Arc::new(emergency));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub(crate) fn emergency(&self) -> Option<&EmergencyQuery> {
        self.emergency.as_ref()
    }

    /// Insert or overwrite the entity under its projected value. NULL is a
    /// valid bucket key. Only called with the owning table's write lock held.
    pub(crate) fn insert_or_update(&self, entity: &E) -> Result<()> {
        let value = (self.getter)(entity);
        let mut buckets = self.buckets.write()?;
        let bucket = buckets.entry(value.clone()).or_default();

        if self.kind == IndexKind::Unique
            && let Some((&existing_id, _)) = bucket.iter().next()
            && existing_id != entity.id()
        {
            return Err(MirrorError::UniquenessViolation {
                index: self.name.clone(),
                value: value.to_string(),
                existing_id,
                new_id: entity.id(),
            });
        }

        bucket.insert(entity.id(), entity.clone());
        Ok(())
    }

    pub(crate) fn find(
        &self,
        value: &Value,
        predicate: &dyn Fn(&E) -> bool,
    ) -> Result<Lookup<Vec<E>>> {
        let buckets = self.buckets.read()?;
        match buckets.get(value) {
            None => Ok(Lookup::Miss),
            Some(bucket) if bucket.is_empty() => Ok(Lookup::Miss),
            Some(bucket) => Ok(Lookup::Hit(
                bucket.values().filter(|e| predicate(e)).cloned().collect(),
            )),
        }
    }

    pub(crate) fn find_only(
        &self,
        throw_if_not_unique: bool,
        value: &Value,
        predicate: &dyn Fn(&E) -> bool,
    ) -> Result<Lookup<Option<E>>> {
        let buckets = self.buckets.read()?;
        let bucket = match buckets.get(value) {
            None => return Ok(Lookup::Miss),
            Some(bucket) if bucket.is_empty() => return Ok(Lookup::Miss),
            Some(bucket) => bucket,
        };

        let mut found = None;
        for entity in bucket.values() {
            if !predicate(entity) {
                continue;
            }
            if found.is_none() {
                found = Some(entity.clone());
                if !throw_if_not_unique {
                    break;
                }
            } else {
                return Err(MirrorError::NotUnique {
                    index: self.name.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(Lookup::Hit(found))
    }

    pub(crate) fn count(
        &self,
        value: &Value,
        predicate: &dyn Fn(&E) -> bool,
    ) -> Result<Lookup<u64>> {
        match self.find(value, predicate)? {
            Lookup::Miss => Ok(Lookup::Miss),
            Lookup::Hit(found) => Ok(Lookup::Hit(found.len() as u64)),
        }
    }
}

/// Names the index to search and the value to probe it with.
#[derive(Debug, Clone)]
pub struct IndexConstraint {
    index_name: String,
    value: Value,
}

impl IndexConstraint {
    pub fn new(index_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            index_name: index_name.into(),
            value: value.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// The set of indexes and listeners a table is created with.
pub struct Indexes<E: Entity> {
    pub(crate) indexes: Vec<Index<E>>,
    pub(crate) item_listeners: Vec<ItemListener<E>>,
    pub(crate) row_listeners: Vec<RowListener>,
}

impl<E: Entity> Indexes<E> {
    pub fn builder() -> IndexesBuilder<E> {
        IndexesBuilder {
            indexes: Vec::new(),
            item_listeners: Vec::new(),
            row_listeners: Vec::new(),
        }
    }
}

pub struct IndexesBuilder<E: Entity> {
    indexes: Vec<Index<E>>,
    item_listeners: Vec<ItemListener<E>>,
    row_listeners: Vec<RowListener>,
}

impl<E: Entity> IndexesBuilder<E> {
    pub fn unique(
        mut self,
        name: impl Into<String>,
        getter: impl Fn(&E) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.indexes.push(Index::new(name, IndexKind::Unique, getter));
        self
    }

    pub fn multi(
        mut self,
        name: impl Into<String>,
        getter: impl Fn(&E) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.indexes.push(Index::new(name, IndexKind::Multi, getter));
        self
    }

    pub fn index(mut self, index: Index<E>) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn on_item(
        mut self,
        name: impl Into<String>,
        listener: impl Fn(&E) + Send + Sync + 'static,
    ) -> Self {
        self.item_listeners.push(ItemListener {
            name: name.into(),
            callback: Box::new(listener),
        });
        self
    }

    pub fn on_row(
        mut self,
        name: impl Into<String>,
        listener: impl Fn(&crate::core::Row) + Send + Sync + 'static,
    ) -> Self {
        self.row_listeners.push(RowListener {
            name: name.into(),
            callback: Box::new(listener),
        });
        self
    }

    pub fn build(self) -> Indexes<E> {
        Indexes {
            indexes: self.indexes,
            item_listeners: self.item_listeners,
            row_listeners: self.row_listeners,
        }
    }
}

/// Named observer of applied entities.
pub struct ItemListener<E> {
    pub(crate) name: String,
    pub(crate) callback: Box<dyn Fn(&E) + Send + Sync>,
}

impl<E> ItemListener<E> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Named observer of applied raw rows.
pub struct RowListener {
    pub(crate) name: String,
    pub(crate) callback: Box<dyn Fn(&crate::core::Row) + Send + Sync>,
}

impl RowListener {
    pub fn name(&self) -> &str {
        &self.name
    }
}
