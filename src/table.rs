use crate::connector::Connector;
use crate::core::{MirrorError, Result, Row, RowBatch};
use crate::entity::{Entity, Id};
use crate::index::{Index, IndexConstraint, Indexes, ItemListener, Lookup, RowListener};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::warn;

/// The single in-memory home of one entity type.
///
/// All writes go through [`Table::insert_or_update_with_row`] under one
/// table-wide lock covering the id set, every index, the journal buffer and
/// every listener, so the whole fan-out becomes visible as a unit. Reads
/// never take that lock; they go straight to the per-index bucket guards.
pub struct Table<E: Entity> {
    indicator_field: String,
    store_index_hint: Option<String>,

    indexes: HashMap<String, Index<E>>,
    item_listeners: Vec<ItemListener<E>>,
    row_listeners: Vec<RowListener>,

    write_lock: Mutex<()>,
    ids: Option<Mutex<HashSet<Id>>>,
    preloaded: AtomicBool,
    journal_buffer: Mutex<Option<RowBatch>>,

    // Set once when the updater attaches; used only by the emergency path.
    store: OnceLock<Arc<dyn Connector>>,
}

impl<E: Entity> Table<E> {
    /// `indicator_spec` is the indicator field name, optionally suffixed
    /// with `@hint` naming a backing-store index for the poll query.
    pub(crate) fn new(
        indicator_spec: &str,
        indexes: Indexes<E>,
        track_ids: bool,
        buffer_journal: bool,
    ) -> Self {
        let (indicator_field, store_index_hint) = match indicator_spec.split_once('@') {
            Some((field, hint)) => (field.to_string(), Some(hint.to_string())),
            None => (indicator_spec.to_string(), None),
        };

        Self {
            indicator_field,
            store_index_hint,
            indexes: indexes
                .indexes
                .into_iter()
                .map(|index| (index.name().to_string(), index))
                .collect(),
            item_listeners: indexes.item_listeners,
            row_listeners: indexes.row_listeners,
            write_lock: Mutex::new(()),
            ids: track_ids.then(|| Mutex::new(HashSet::new())),
            preloaded: AtomicBool::new(false),
            journal_buffer: Mutex::new(buffer_journal.then(RowBatch::new)),
            store: OnceLock::new(),
        }
    }

    pub fn indicator_field(&self) -> &str {
        &self.indicator_field
    }

    pub fn store_index_hint(&self) -> Option<&str> {
        self.store_index_hint.as_deref()
    }

    pub fn is_preloaded(&self) -> bool {
        self.preloaded.load(Ordering::Acquire)
    }

    pub(crate) fn set_preloaded(&self) {
        self.preloaded.store(true, Ordering::Release);
    }

    pub(crate) fn attach_store(&self, store: Arc<dyn Connector>) {
        let _ = self.store.set(store);
    }

    pub fn has_row_listeners(&self) -> bool {
        !self.row_listeners.is_empty()
    }

    /// Count of distinct ids ever applied. Tables created without id
    /// tracking do not support this.
    pub fn size(&self) -> Result<usize> {
        match &self.ids {
            Some(ids) => Ok(ids.lock()?.len()),
            None => Err(MirrorError::Unsupported(format!(
                "table '{}' was created without id tracking",
                E::TABLE
            ))),
        }
    }

    pub fn insert_or_update(&self, entity: &E) -> Result<()> {
        self.insert_or_update_with_row(entity, None)
    }

    /// Apply one entity (and optionally its raw row) to the table: id set,
    /// every index, the journal buffer while it is still active, then the
    /// listeners. Re-applying an unchanged entity overwrites identically.
    pub fn insert_or_update_with_row(&self, entity: &E, raw_row: Option<&Row>) -> Result<()> {
        let _guard = self.write_lock.lock()?;

        if let Some(ids) = &self.ids {
            ids.lock()?.insert(entity.id());
        }
        for index in self.indexes.values() {
            index.insert_or_update(entity)?;
        }
        if let Some(row) = raw_row {
            if let Some(buffer) = self.journal_buffer.lock()?.as_mut() {
                buffer.push(row);
            }
            for listener in &self.row_listeners {
                (listener.callback)(row);
            }
        }
        for listener in &self.item_listeners {
            (listener.callback)(entity);
        }
        Ok(())
    }

    /// Take the buffered journal rows and stop buffering. Returns `None` if
    /// buffering was never enabled or the buffer was already taken.
    pub(crate) fn take_journal_buffer(&self) -> Result<Option<RowBatch>> {
        Ok(self.journal_buffer.lock()?.take())
    }

    pub async fn find(
        &self,
        constraint: &IndexConstraint,
        predicate: &(dyn Fn(&E) -> bool + Send + Sync),
    ) -> Result<Vec<E>> {
        let index = self.index(constraint.index_name())?;
        match index.find(constraint.value(), predicate)? {
            Lookup::Hit(found) => Ok(found),
            Lookup::Miss => self.emergency_find(index, constraint, predicate).await,
        }
    }

    pub async fn find_only(
        &self,
        throw_if_not_unique: bool,
        constraint: &IndexConstraint,
        predicate: &(dyn Fn(&E) -> bool + Send + Sync),
    ) -> Result<Option<E>> {
        let index = self.index(constraint.index_name())?;
        match index.find_only(throw_if_not_unique, constraint.value(), predicate)? {
            Lookup::Hit(found) => Ok(found),
            Lookup::Miss => {
                let mut found = self.emergency_find(index, constraint, predicate).await?;
                if throw_if_not_unique && found.len() > 1 {
                    return Err(MirrorError::NotUnique {
                        index: constraint.index_name().to_string(),
                        value: constraint.value().to_string(),
                    });
                }
                Ok(if found.is_empty() {
                    None
                } else {
                    Some(found.swap_remove(0))
                })
            }
        }
    }

    pub async fn count(
        &self,
        constraint: &IndexConstraint,
        predicate: &(dyn Fn(&E) -> bool + Send + Sync),
    ) -> Result<u64> {
        let index = self.index(constraint.index_name())?;
        match index.count(constraint.value(), predicate)? {
            Lookup::Hit(count) => Ok(count),
            Lookup::Miss => Ok(self.emergency_find(index, constraint, predicate).await?.len() as u64),
        }
    }

    fn index(&self, name: &str) -> Result<&Index<E>> {
        self.indexes.get(name).ok_or_else(|| MirrorError::IndexNotFound {
            table: E::TABLE.to_string(),
            index: name.to_string(),
        })
    }

    /// Memory miss: if the index carries an emergency helper, query the
    /// backing store directly and apply the results back into the table
    /// before returning them. Runs on the caller's execution path, never
    /// under the table lock.
    async fn emergency_find(
        &self,
        index: &Index<E>,
        constraint: &IndexConstraint,
        predicate: &(dyn Fn(&E) -> bool + Send + Sync),
    ) -> Result<Vec<E>> {
        let Some(emergency) = index.emergency() else {
            return Ok(Vec::new());
        };
        let Some(store) = self.store.get() else {
            return Ok(Vec::new());
        };

        let fields = emergency(constraint.value());
        let rows = store.query_rows_by_fields(E::TABLE, &fields).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        warn!(
            table = E::TABLE,
            index = constraint.index_name(),
            rows = rows.len(),
            "emergency fallback hit the backing store"
        );

        let mut result = Vec::new();
        for row in &rows {
            let entity = E::from_row(row)?;
            warn!(
                table = E::TABLE,
                id = entity.id(),
                "emergency fallback applied entity"
            );
            self.insert_or_update_with_row(&entity, Some(row))?;
            if predicate(&entity) {
                result.push(entity);
            }
        }
        Ok(result)
    }
}
