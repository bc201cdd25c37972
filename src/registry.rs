use crate::connector::Connector;
use crate::core::{MirrorError, Result, Row, Value};
use crate::entity::{Entity, Id, Signature};
use crate::index::{IndexConstraint, Indexes};
use crate::journal::Journal;
use crate::sync::{DEFAULT_BATCH_LIMIT, DEFAULT_RESCAN_INTERVAL, TableUpdater};
use crate::table::Table;
use async_trait::async_trait;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PRELOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Registry-wide tuning knobs, shared by every table it creates.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound on rows fetched per poll pass.
    pub batch_limit: usize,
    /// Idle interval between poll passes; busy tables poll at a tenth of it.
    pub rescan_interval: Duration,
    /// Directory for restart journals. `None` disables journaling entirely.
    pub journal_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            rescan_interval: DEFAULT_RESCAN_INTERVAL,
            journal_dir: None,
        }
    }
}

/// Per-table creation options. `indicator_field` accepts the `"field@hint"`
/// form to pass an index hint through to the backing store.
pub struct TableOptions<E: Entity> {
    indicator_field: String,
    initial_indicator: Option<Value>,
    indexes: Indexes<E>,
    wait_for_preload: bool,
    preload_timeout: Option<Duration>,
    journal: bool,
    track_ids: bool,
    connector: Option<Arc<dyn Connector>>,
}

impl<E: Entity> TableOptions<E> {
    pub fn new(indicator_field: impl Into<String>, indexes: Indexes<E>) -> Self {
        Self {
            indicator_field: indicator_field.into(),
            initial_indicator: None,
            indexes,
            wait_for_preload: true,
            preload_timeout: None,
            journal: true,
            track_ids: true,
            connector: None,
        }
    }

    /// Start polling from this indicator value instead of a full scan.
    /// Rows older than it are never mirrored.
    pub fn initial_indicator(mut self, value: impl Into<Value>) -> Self {
        self.initial_indicator = Some(value.into());
        self
    }

    /// Return from `create_table` immediately instead of blocking until the
    /// first convergence.
    pub fn no_wait(mut self) -> Self {
        self.wait_for_preload = false;
        self
    }

    pub fn preload_timeout(mut self, timeout: Duration) -> Self {
        self.preload_timeout = Some(timeout);
        self
    }

    pub fn without_journal(mut self) -> Self {
        self.journal = false;
        self
    }

    /// Skip id tracking; saves memory but makes `size` unavailable.
    pub fn without_id_tracking(mut self) -> Self {
        self.track_ids = false;
        self
    }

    /// Use a dedicated backing store for this table instead of the
    /// registry-wide one.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

/// Type-erased surface the registry keeps per table. Every operation is
/// expressed over raw rows so that structurally compatible entity types can
/// share one mirrored table.
#[async_trait]
trait TableHandle: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn is_preloaded(&self) -> bool;
    fn size(&self) -> Result<usize>;
    fn stop(&self);
    async fn find_rows(
        &self,
        constraint: &IndexConstraint,
        predicate: &(dyn for<'a> Fn(&'a Row) -> bool + Send + Sync),
    ) -> Result<Vec<Row>>;
    async fn find_only_row(
        &self,
        throw_if_not_unique: bool,
        constraint: &IndexConstraint,
        predicate: &(dyn for<'a> Fn(&'a Row) -> bool + Send + Sync),
    ) -> Result<Option<Row>>;
    async fn count_rows(
        &self,
        constraint: &IndexConstraint,
        predicate: &(dyn for<'a> Fn(&'a Row) -> bool + Send + Sync),
    ) -> Result<u64>;
    fn insert_row(&self, row: Row) -> Result<()>;
    async fn refresh_by_id(&self, id: Id) -> Result<()>;
    async fn force_update(&self) -> Result<()>;
}

struct TableRuntime<E: Entity> {
    table: Arc<Table<E>>,
    updater: Arc<TableUpdater<E>>,
}

#[async_trait]
impl<E: Entity> TableHandle for TableRuntime<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_preloaded(&self) -> bool {
        self.table.is_preloaded()
    }

    fn size(&self) -> Result<usize> {
        self.table.size()
    }

    fn stop(&self) {
        self.updater.stop();
    }

    async fn find_rows(
        &self,
        constraint: &IndexConstraint,
        predicate: &(dyn for<'a> Fn(&'a Row) -> bool + Send + Sync),
    ) -> Result<Vec<Row>> {
        let adapted = |entity: &E| predicate(&entity.to_row());
        let found = self.table.find(constraint, &adapted).await?;
        Ok(found.iter().map(Entity::to_row).collect())
    }

    async fn find_only_row(
        &self,
        throw_if_not_unique: bool,
        constraint: &IndexConstraint,
        predicate: &(dyn for<'a> Fn(&'a Row) -> bool + Send + Sync),
    ) -> Result<Option<Row>> {
        let adapted = |entity: &E| predicate(&entity.to_row());
        let found = self
            .table
            .find_only(throw_if_not_unique, constraint, &adapted)
            .await?;
        Ok(found.map(|entity| entity.to_row()))
    }

    async fn count_rows(
        &self,
        constraint: &IndexConstraint,
        predicate: &(dyn for<'a> Fn(&'a Row) -> bool + Send + Sync),
    ) -> Result<u64> {
        let adapted = |entity: &E| predicate(&entity.to_row());
        self.table.count(constraint, &adapted).await
    }

    fn insert_row(&self, row: Row) -> Result<()> {
        let entity = E::from_row(&row)?;
        self.table.insert_or_update_with_row(&entity, Some(&row))
    }

    async fn refresh_by_id(&self, id: Id) -> Result<()> {
        self.updater.insert_or_update_by_id(id).await
    }

    async fn force_update(&self) -> Result<()> {
        self.updater.update_once().await.map(|_| ())
    }
}

struct TableEntry {
    type_id: TypeId,
    signature: Signature,
    handle: Arc<dyn TableHandle>,
}

/// The facade: owns all mirrored tables, keyed by backing-store table name.
/// Typed operations go straight to the concrete table when the caller's
/// entity type is the one the table was created with, and through the row
/// contract when the caller uses a different but structurally compatible
/// type.
pub struct Registry {
    connector: Arc<dyn Connector>,
    journal: Option<Journal>,
    batch_limit: usize,
    rescan_interval: Duration,
    tables: Mutex<HashMap<String, TableEntry>>,
}

impl Registry {
    pub fn new(connector: Arc<dyn Connector>) -> Result<Self> {
        Self::with_config(connector, RegistryConfig::default())
    }

    pub fn with_config(connector: Arc<dyn Connector>, config: RegistryConfig) -> Result<Self> {
        let journal = config.journal_dir.map(Journal::open).transpose()?;
        Ok(Self {
            connector,
            journal,
            batch_limit: config.batch_limit,
            rescan_interval: config.rescan_interval,
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Create the mirrored table for `E` and start its updater. If the table
    /// already exists under a compatible entity type this is a no-op apart
    /// from the optional preload wait; an incompatible type replaces the
    /// table and stops the old updater.
    pub async fn create_table<E: Entity>(&self, options: TableOptions<E>) -> Result<()> {
        let name = E::TABLE;

        let compatible = {
            let tables = self.tables.lock()?;
            match tables.get(name) {
                Some(entry) => {
                    entry.type_id == TypeId::of::<E>() || entry.signature == E::signature()
                }
                None => false,
            }
        };
        if compatible {
            if options.wait_for_preload {
                self.wait_named(name, options.preload_timeout).await?;
            }
            return Ok(());
        }

        let store = options
            .connector
            .unwrap_or_else(|| Arc::clone(&self.connector));
        let journal = if options.journal {
            self.journal.clone()
        } else {
            None
        };
        let table = Arc::new(Table::new(
            &options.indicator_field,
            options.indexes,
            options.track_ids,
            journal.is_some(),
        ));
        let updater = TableUpdater::new(
            Arc::clone(&table),
            store,
            journal,
            self.batch_limit,
            self.rescan_interval,
            options.initial_indicator,
        );
        updater.start();
        let handle: Arc<dyn TableHandle> = Arc::new(TableRuntime { table, updater });

        let replaced = {
            let mut tables = self.tables.lock()?;
            tables.insert(
                name.to_string(),
                TableEntry {
                    type_id: TypeId::of::<E>(),
                    signature: E::signature(),
                    handle,
                },
            )
        };
        if let Some(old) = replaced {
            warn!(
                table = name,
                entity = type_name::<E>(),
                "replacing mirrored table with an incompatible entity type"
            );
            old.handle.stop();
        } else {
            info!(table = name, entity = type_name::<E>(), "created mirrored table");
        }

        if options.wait_for_preload {
            self.wait_named(name, options.preload_timeout).await?;
        }
        Ok(())
    }

    pub async fn find<E, P>(&self, constraint: &IndexConstraint, matcher: P) -> Result<Vec<E>>
    where
        E: Entity,
        P: Fn(&E) -> bool + Send + Sync,
    {
        let handle = self.handle_for::<E>()?;
        if let Some(runtime) = handle.as_any().downcast_ref::<TableRuntime<E>>() {
            return runtime.table.find(constraint, &matcher).await;
        }
        let predicate =
            |row: &Row| E::from_row(row).map(|entity| matcher(&entity)).unwrap_or(false);
        let rows = handle.find_rows(constraint, &predicate).await?;
        rows.iter().map(E::from_row).collect()
    }

    pub async fn find_only<E, P>(
        &self,
        throw_if_not_unique: bool,
        constraint: &IndexConstraint,
        matcher: P,
    ) -> Result<Option<E>>
    where
        E: Entity,
        P: Fn(&E) -> bool + Send + Sync,
    {
        let handle = self.handle_for::<E>()?;
        if let Some(runtime) = handle.as_any().downcast_ref::<TableRuntime<E>>() {
            return runtime
                .table
                .find_only(throw_if_not_unique, constraint, &matcher)
                .await;
        }
        let predicate =
            |row: &Row| E::from_row(row).map(|entity| matcher(&entity)).unwrap_or(false);
        let row = handle
            .find_only_row(throw_if_not_unique, constraint, &predicate)
            .await?;
        row.as_ref().map(E::from_row).transpose()
    }

    pub async fn count<E, P>(&self, constraint: &IndexConstraint, matcher: P) -> Result<u64>
    where
        E: Entity,
        P: Fn(&E) -> bool + Send + Sync,
    {
        let handle = self.handle_for::<E>()?;
        if let Some(runtime) = handle.as_any().downcast_ref::<TableRuntime<E>>() {
            return runtime.table.count(constraint, &matcher).await;
        }
        let predicate =
            |row: &Row| E::from_row(row).map(|entity| matcher(&entity)).unwrap_or(false);
        handle.count_rows(constraint, &predicate).await
    }

    /// Push one entity into the mirror directly, without waiting for the
    /// poll loop to observe it. The backing store is not written.
    pub fn insert_or_update<E: Entity>(&self, entity: &E) -> Result<()> {
        let handle = self.handle_for::<E>()?;
        if let Some(runtime) = handle.as_any().downcast_ref::<TableRuntime<E>>() {
            return runtime.table.insert_or_update(entity);
        }
        handle.insert_row(entity.to_row())
    }

    /// Synchronously re-fetch the given rows from the backing store and
    /// apply them. Ids missing from the store are skipped.
    pub async fn insert_or_update_by_ids<E: Entity>(&self, ids: &[Id]) -> Result<()> {
        let handle = self.handle_for::<E>()?;
        for &id in ids {
            handle.refresh_by_id(id).await?;
        }
        Ok(())
    }

    /// Run one poll pass inline instead of waiting for the background loop.
    pub async fn force_update<E: Entity>(&self) -> Result<()> {
        self.handle_for::<E>()?.force_update().await
    }

    pub fn size<E: Entity>(&self) -> Result<usize> {
        self.handle_for::<E>()?.size()
    }

    pub fn is_preloaded<E: Entity>(&self) -> Result<bool> {
        Ok(self.handle_for::<E>()?.is_preloaded())
    }

    pub fn is_all_preloaded(&self) -> Result<bool> {
        let tables = self.tables.lock()?;
        Ok(tables.values().all(|entry| entry.handle.is_preloaded()))
    }

    pub async fn wait_for_preload<E: Entity>(&self, timeout: Option<Duration>) -> Result<()> {
        self.wait_named(E::TABLE, timeout).await
    }

    /// Stop the table's updater and forget it. Returns whether it existed.
    pub fn drop_table_if_exists(&self, table: &str) -> Result<bool> {
        let removed = self.tables.lock()?.remove(table);
        match removed {
            Some(entry) => {
                entry.handle.stop();
                info!(table, "dropped mirrored table");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop every updater. Tables stay queryable but go stale.
    pub fn shutdown(&self) -> Result<()> {
        let tables = self.tables.lock()?;
        for entry in tables.values() {
            entry.handle.stop();
        }
        Ok(())
    }

    fn handle_for<E: Entity>(&self) -> Result<Arc<dyn TableHandle>> {
        let tables = self.tables.lock()?;
        let entry = tables
            .get(E::TABLE)
            .ok_or_else(|| MirrorError::TableNotFound(E::TABLE.to_string()))?;
        if entry.type_id != TypeId::of::<E>() && entry.signature != E::signature() {
            return Err(MirrorError::IncompatibleType(
                E::TABLE.to_string(),
                type_name::<E>().to_string(),
            ));
        }
        Ok(Arc::clone(&entry.handle))
    }

    async fn wait_named(&self, table: &str, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let preloaded = {
                let tables = self.tables.lock()?;
                tables
                    .get(table)
                    .ok_or_else(|| MirrorError::TableNotFound(table.to_string()))?
                    .handle
                    .is_preloaded()
            };
            if preloaded {
                return Ok(());
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Err(MirrorError::PreloadTimeout(table.to_string()));
            }
            tokio::time::sleep(PRELOAD_POLL_INTERVAL).await;
        }
    }
}
