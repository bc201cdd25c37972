use crate::connector::Connector;
use crate::core::{Result, Row, Value};
use crate::entity::{Entity, Id};
use crate::journal::Journal;
use crate::table::Table;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub(crate) const DEFAULT_BATCH_LIMIT: usize = 200_000;
pub(crate) const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_millis(500);

/// How many times one id may be re-applied at the same indicator boundary
/// before it is skipped. The inclusive `>=` poll bound re-fetches rows that
/// tie with the cursor, so a small tolerance bounds reprocessing while still
/// accepting a handful of legitimately tied rows.
const MAX_BOUNDARY_REAPPLIES: u32 = 3;

struct PassState {
    cursor: Option<Value>,
    /// Per-id count of applies at the current boundary indicator value;
    /// reset whenever the cursor actually advances.
    boundary_counts: HashMap<Id, u32>,
    journal_checked: bool,
}

impl PassState {
    /// The cursor only moves forward, and only after the row's entity has
    /// been applied to the table.
    fn advance_cursor(&mut self, indicator: Value) {
        if indicator.is_null() {
            return;
        }
        match &self.cursor {
            None => self.cursor = Some(indicator),
            Some(current) => {
                if current
                    .partial_cmp(&indicator)
                    .is_some_and(|ord| ord != Ordering::Greater)
                {
                    self.cursor = Some(indicator);
                }
            }
        }
    }
}

/// Whether a row sits on the cursor boundary and is a dedup candidate. A
/// table whose rows all carry a null indicator never grows a cursor, so a
/// null indicator against an empty cursor counts as the boundary too;
/// without that those rows would be re-applied forever and the table would
/// never preload.
fn at_boundary(cursor: Option<&Value>, indicator: &Value) -> bool {
    match cursor {
        Some(boundary) => boundary == indicator,
        None => indicator.is_null(),
    }
}

pub(crate) struct PassOutcome {
    pub applied: usize,
    pub from_journal: bool,
}

/// Background synchronization engine: one per table, one poll/apply loop on
/// a dedicated tokio task. Failures inside a pass are logged and the loop
/// continues; only an explicit stop ends it.
pub(crate) struct TableUpdater<E: Entity> {
    table: Arc<Table<E>>,
    store: Arc<dyn Connector>,
    journal: Option<Journal>,
    batch_limit: usize,
    rescan_interval: Duration,
    state: tokio::sync::Mutex<PassState>,
    shutdown: watch::Sender<bool>,
    started_at: Instant,
}

impl<E: Entity> TableUpdater<E> {
    pub fn new(
        table: Arc<Table<E>>,
        store: Arc<dyn Connector>,
        journal: Option<Journal>,
        batch_limit: usize,
        rescan_interval: Duration,
        initial_indicator: Option<Value>,
    ) -> Arc<Self> {
        table.attach_store(Arc::clone(&store));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            table,
            store,
            journal,
            batch_limit,
            rescan_interval,
            state: tokio::sync::Mutex::new(PassState {
                cursor: initial_indicator,
                boundary_counts: HashMap::new(),
                journal_checked: false,
            }),
            shutdown,
            started_at: Instant::now(),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let updater = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        info!(table = E::TABLE, "started table updater");
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let outcome = match updater.update_once().await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        error!(table = E::TABLE, error = %e, "update pass failed, will retry");
                        None
                    }
                };
                updater.sleep_between_rescans(outcome, &mut shutdown).await;
            }
            warn!(table = E::TABLE, "table updater finished");
        });
    }

    /// Cooperative stop: observed at the loop top and at the head of every
    /// sleep; an in-flight pass completes first.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// One full poll + apply pass. Also the implementation of the
    /// synchronous force-update operation.
    pub async fn update_once(&self) -> Result<PassOutcome> {
        let mut state = self.state.lock().await;
        let (rows, from_journal) = self.next_batch(&mut state).await?;

        let indicator_field = self.table.indicator_field().to_string();
        let prev_boundary = state.cursor.clone();
        // Skip the row clone path when nobody consumes raw rows.
        let wants_rows = self.table.has_row_listeners() || self.journal.is_some();
        let mut applied = 0;

        for row in &rows {
            let id = row.id(E::ID_COLUMN)?;
            let indicator = row.get(&indicator_field).cloned().unwrap_or(Value::Null);

            if at_boundary(prev_boundary.as_ref(), &indicator)
                && state.boundary_counts.get(&id).copied().unwrap_or(0) >= MAX_BOUNDARY_REAPPLIES
            {
                continue;
            }

            let entity = E::from_row(row)?;
            self.table
                .insert_or_update_with_row(&entity, wants_rows.then_some(row))?;
            state.advance_cursor(indicator);
            applied += 1;
        }

        if applied >= 10 {
            let cursor = state.cursor.clone().unwrap_or(Value::Null);
            debug!(
                table = E::TABLE,
                applied,
                cursor = %cursor,
                "applied updated rows"
            );
        }

        if applied == 0 && !self.table.is_preloaded() {
            // Flush before flipping the flag so preload waiters observe a
            // written journal.
            self.flush_journal();
            self.table.set_preloaded();
            info!(
                table = E::TABLE,
                items = self.table.size().unwrap_or(0),
                elapsed_ms = self.started_at.elapsed().as_millis() as u64,
                "table preloaded"
            );
        }

        if state.cursor != prev_boundary {
            state.boundary_counts.clear();
        }
        for row in &rows {
            let indicator = row.get(&indicator_field).cloned().unwrap_or(Value::Null);
            if at_boundary(state.cursor.as_ref(), &indicator) {
                *state.boundary_counts.entry(row.id(E::ID_COLUMN)?).or_insert(0) += 1;
            }
        }

        Ok(PassOutcome {
            applied,
            from_journal,
        })
    }

    /// Fetch and apply exactly one row by id, bypassing the loop. A missing
    /// row is a no-op; the connector rejects a multi-row result.
    pub async fn insert_or_update_by_id(&self, id: Id) -> Result<()> {
        let Some(row) = self.store.query_row_by_id(E::TABLE, E::ID_COLUMN, id).await? else {
            return Ok(());
        };
        let entity = E::from_row(&row)?;
        let wants_rows = self.table.has_row_listeners() || self.journal.is_some();
        self.table
            .insert_or_update_with_row(&entity, wants_rows.then_some(&row))
    }

    async fn next_batch(&self, state: &mut PassState) -> Result<(Vec<Row>, bool)> {
        if state.cursor.is_none() && !state.journal_checked && !self.table.is_preloaded() {
            state.journal_checked = true;
            if let Some(journal) = &self.journal {
                match journal.read(E::TABLE) {
                    Ok(Some(batch)) => {
                        info!(
                            table = E::TABLE,
                            rows = batch.len(),
                            "consuming restart journal instead of a full scan"
                        );
                        return Ok((batch.into_rows(), true));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            table = E::TABLE,
                            error = %e,
                            "journal read failed, falling back to a full scan"
                        );
                    }
                }
            }
        }

        let started = Instant::now();
        let rows = self
            .store
            .query_rows_since(
                E::TABLE,
                self.table.indicator_field(),
                state.cursor.as_ref(),
                E::ID_COLUMN,
                self.batch_limit,
                self.table.store_index_hint(),
            )
            .await?;

        let elapsed = started.elapsed();
        if elapsed * 10 > self.rescan_interval {
            warn!(
                table = E::TABLE,
                elapsed_ms = elapsed.as_millis() as u64,
                "rescan query took too long"
            );
        }
        if rows.len() == self.batch_limit {
            warn!(
                table = E::TABLE,
                rows = rows.len(),
                "suspicious row count while rescanning, batch cap reached"
            );
        }
        Ok((rows, false))
    }

    fn flush_journal(&self) {
        let Some(journal) = &self.journal else {
            return;
        };
        match self.table.take_journal_buffer() {
            Ok(Some(batch)) => {
                if let Err(e) = journal.write(E::TABLE, &batch) {
                    warn!(
                        table = E::TABLE,
                        error = %e,
                        "journal write failed, next restart pays a full scan"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => warn!(table = E::TABLE, error = %e, "journal buffer unavailable"),
        }
    }

    async fn sleep_between_rescans(
        &self,
        outcome: Option<PassOutcome>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        match outcome {
            // Straight to the first real poll after a journal replay.
            Some(outcome) if outcome.from_journal => {}
            Some(outcome) if outcome.applied == 0 => {
                cancellable_sleep(jittered(self.rescan_interval), shutdown).await;
            }
            Some(outcome) if outcome.applied * 2 >= self.batch_limit => {
                debug!(
                    table = E::TABLE,
                    "skipping sleep, updated near the batch cap"
                );
            }
            Some(_) => {
                cancellable_sleep(jittered(self.rescan_interval / 10), shutdown).await;
            }
            // Failed pass: back off for a full interval before retrying.
            None => cancellable_sleep(jittered(self.rescan_interval), shutdown).await,
        }
    }
}

async fn cancellable_sleep(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}

fn jittered(base: Duration) -> Duration {
    let spread = base.as_millis() as u64 / 5;
    if spread == 0 {
        return base;
    }
    base + Duration::from_millis(rand::random_range(0..spread))
}
