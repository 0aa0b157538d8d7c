//! Change-tracking unit of work over a sea-orm connection.
//!
//! [`EntityContext`] plays the role of a per-request data context: it loads
//! `MyEntities` rows, remembers what it has seen, collects additions and
//! removals in memory and persists them in one transaction on
//! [`EntityContext::save_changes`].

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Schema, TransactionTrait,
};

use crate::types::my_entity::{ActiveModel, Column};
use crate::types::{MyEntities, MyEntity};

/// Upper bound on rows carried by a single generated INSERT or DELETE.
const MAX_ROWS_PER_STATEMENT: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

#[derive(Debug)]
struct Entry {
    entity: MyEntity,
    /// Values as last read from or written to the database.
    original: Option<MyEntity>,
    state: EntryState,
}

/// Pending work counted by state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingChanges {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.deleted == 0
    }
}

pub struct EntityContext {
    db: Arc<DatabaseConnection>,
    entries: Vec<Entry>,
    /// Entity id to its slot in `entries`.
    index: HashMap<String, usize>,
    auto_detect_changes: bool,
}

impl EntityContext {
    pub fn new(db: impl Into<Arc<DatabaseConnection>>) -> Self {
        Self {
            db: db.into(),
            entries: Vec::new(),
            index: HashMap::new(),
            auto_detect_changes: true,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn auto_detect_changes(&self) -> bool {
        self.auto_detect_changes
    }

    /// When disabled, in-place edits made through [`Self::entity_mut`] are only
    /// picked up by an explicit [`Self::detect_changes`] call.
    pub fn set_auto_detect_changes(&mut self, enabled: bool) {
        self.auto_detect_changes = enabled;
    }

    /// Loads every row and starts tracking it as unchanged.
    pub async fn to_list(&mut self) -> Result<Vec<MyEntity>, DbErr> {
        let rows = MyEntities::find().all(self.db.as_ref()).await?;
        for row in &rows {
            self.attach(row.clone(), EntryState::Unchanged);
        }
        Ok(rows)
    }

    pub fn add_range<I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = MyEntity>,
    {
        for entity in entities {
            self.attach(entity, EntryState::Added);
        }
    }

    /// Marks the given entities for deletion. Entities that were only added in
    /// this context are dropped without touching the database.
    pub fn remove_range<'a, I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = &'a MyEntity>,
    {
        for entity in entities {
            match self.position(&entity.id) {
                Some(index) if self.entries[index].state == EntryState::Added => {
                    self.detach(index);
                }
                Some(index) => self.entries[index].state = EntryState::Deleted,
                None => self.push(Entry {
                    entity: entity.clone(),
                    original: Some(entity.clone()),
                    state: EntryState::Deleted,
                }),
            }
        }
    }

    pub fn entity_mut(&mut self, id: &str) -> Option<&mut MyEntity> {
        let index = self.position(id)?;
        if self.entries[index].state == EntryState::Deleted {
            return None;
        }
        Some(&mut self.entries[index].entity)
    }

    pub fn state_of(&self, id: &str) -> Option<EntryState> {
        self.position(id).map(|index| self.entries[index].state)
    }

    /// Number of tracked entries currently in `state`.
    pub fn count(&self, state: EntryState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    pub fn pending(&self) -> PendingChanges {
        PendingChanges {
            added: self.count(EntryState::Added),
            modified: self.count(EntryState::Modified),
            deleted: self.count(EntryState::Deleted),
        }
    }

    /// Flags unchanged entries whose values drifted from their snapshot.
    pub fn detect_changes(&mut self) {
        for entry in &mut self.entries {
            if entry.state == EntryState::Unchanged
                && entry.original.as_ref() != Some(&entry.entity)
            {
                entry.state = EntryState::Modified;
            }
        }
    }

    /// Persists all pending changes inside a single transaction and returns the
    /// number of affected rows. Tracked state is only accepted after commit.
    pub async fn save_changes(&mut self) -> Result<u64, DbErr> {
        if self.auto_detect_changes {
            self.detect_changes();
        }

        let pending = self.pending();
        if pending.is_empty() {
            return Ok(0);
        }
        debug!(
            "Saving changes: added={}, modified={}, deleted={}",
            pending.added, pending.modified, pending.deleted
        );

        let txn = self.db.begin().await?;
        let mut affected = 0;

        let added: Vec<&MyEntity> = self.entities_in(EntryState::Added).collect();
        for chunk in added.chunks(MAX_ROWS_PER_STATEMENT) {
            let models = chunk.iter().map(|entity| ActiveModel {
                id: Set(entity.id.clone()),
                name: Set(entity.name.clone()),
            });
            affected += MyEntities::insert_many(models)
                .exec_without_returning(&txn)
                .await?;
        }

        for entity in self.entities_in(EntryState::Modified) {
            affected += MyEntities::update_many()
                .col_expr(Column::Name, Expr::value(entity.name.clone()))
                .filter(Column::Id.eq(entity.id.clone()))
                .exec(&txn)
                .await?
                .rows_affected;
        }

        let deleted: Vec<String> = self
            .entities_in(EntryState::Deleted)
            .map(|entity| entity.id.clone())
            .collect();
        for chunk in deleted.chunks(MAX_ROWS_PER_STATEMENT) {
            affected += MyEntities::delete_many()
                .filter(Column::Id.is_in(chunk.iter().cloned()))
                .exec(&txn)
                .await?
                .rows_affected;
        }

        txn.commit().await?;
        self.accept_changes();

        Ok(affected)
    }

    /// Creates the `"MyEntities"` table from the entity definition if it is missing.
    pub async fn ensure_created(&self) -> Result<(), DbErr> {
        let backend = self.db.get_database_backend();
        let mut statement = Schema::new(backend).create_table_from_entity(MyEntities);
        statement.if_not_exists();
        self.db.execute(backend.build(&statement)).await?;
        Ok(())
    }

    fn accept_changes(&mut self) {
        if self.count(EntryState::Deleted) > 0 {
            self.entries.retain(|entry| entry.state != EntryState::Deleted);
            self.index = self
                .entries
                .iter()
                .enumerate()
                .map(|(slot, entry)| (entry.entity.id.clone(), slot))
                .collect();
        }
        for entry in &mut self.entries {
            entry.original = Some(entry.entity.clone());
            entry.state = EntryState::Unchanged;
        }
    }

    fn attach(&mut self, entity: MyEntity, state: EntryState) {
        let original = match state {
            EntryState::Added => None,
            _ => Some(entity.clone()),
        };
        match self.position(&entity.id) {
            Some(index) => {
                self.entries[index] = Entry {
                    entity,
                    original,
                    state,
                }
            }
            None => self.push(Entry {
                entity,
                original,
                state,
            }),
        }
    }

    fn push(&mut self, entry: Entry) {
        self.index.insert(entry.entity.id.clone(), self.entries.len());
        self.entries.push(entry);
    }

    /// Forgets the entry at `slot`; the last entry moves into its place.
    fn detach(&mut self, slot: usize) {
        let removed = self.entries.swap_remove(slot);
        self.index.remove(&removed.entity.id);
        if let Some(moved) = self.entries.get(slot) {
            self.index.insert(moved.entity.id.clone(), slot);
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    fn entities_in(&self, state: EntryState) -> impl Iterator<Item = &MyEntity> {
        self.entries
            .iter()
            .filter(move |entry| entry.state == state)
            .map(|entry| &entry.entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::generate_entities;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn entity(id: &str, name: &str) -> MyEntity {
        MyEntity {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn to_list_tracks_loaded_rows_as_unchanged() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![entity("a", "Entity 0"), entity("b", "Entity 1")]])
            .into_connection();
        let mut context = EntityContext::new(db);

        let rows = context.to_list().await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(context.count(EntryState::Unchanged), 2);
        assert!(context.pending().is_empty());
    }

    #[tokio::test]
    async fn save_without_pending_changes_skips_the_database() {
        // No exec results queued: any statement would fail.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let mut context = EntityContext::new(db);

        assert_eq!(context.save_changes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn added_entities_become_unchanged_after_save() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(3)])
            .into_connection();
        let mut context = EntityContext::new(db);
        context.add_range(generate_entities(3));
        assert_eq!(context.pending().added, 3);

        let affected = context.save_changes().await.unwrap();

        assert_eq!(affected, 3);
        assert_eq!(context.count(EntryState::Unchanged), 3);
        assert!(context.pending().is_empty());
    }

    #[tokio::test]
    async fn removed_rows_are_detached_after_save() {
        let loaded = vec![entity("a", "Entity 0"), entity("b", "Entity 1")];
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([loaded])
            .append_exec_results([exec(2)])
            .into_connection();
        let mut context = EntityContext::new(db);

        let rows = context.to_list().await.unwrap();
        context.remove_range(&rows);
        assert_eq!(context.pending().deleted, 2);

        assert_eq!(context.save_changes().await.unwrap(), 2);
        assert_eq!(context.state_of("a"), None);
        assert_eq!(context.state_of("b"), None);
    }

    #[tokio::test]
    async fn removing_an_added_entity_cancels_the_insert() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let mut context = EntityContext::new(db);
        let fresh = entity("x", "Entity 0");

        context.add_range([fresh.clone()]);
        context.remove_range([&fresh]);

        assert!(context.pending().is_empty());
        assert_eq!(context.save_changes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn in_place_edits_need_detection_when_auto_detect_is_off() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![entity("a", "Entity 0")]])
            .append_exec_results([exec(1)])
            .into_connection();
        let mut context = EntityContext::new(db);
        context.set_auto_detect_changes(false);
        context.to_list().await.unwrap();

        context.entity_mut("a").unwrap().name = "renamed".to_string();
        assert_eq!(context.save_changes().await.unwrap(), 0);
        assert_eq!(context.state_of("a"), Some(EntryState::Unchanged));

        context.detect_changes();
        assert_eq!(context.state_of("a"), Some(EntryState::Modified));
        assert_eq!(context.save_changes().await.unwrap(), 1);
        assert_eq!(context.state_of("a"), Some(EntryState::Unchanged));
    }

    #[tokio::test]
    async fn in_place_edits_are_saved_when_auto_detect_is_on() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![entity("a", "Entity 0")]])
            .append_exec_results([exec(1)])
            .into_connection();
        let mut context = EntityContext::new(db);
        assert!(context.auto_detect_changes());
        context.to_list().await.unwrap();

        context.entity_mut("a").unwrap().name = "renamed".to_string();

        assert_eq!(context.save_changes().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_loads_track_each_id_once() {
        let rows = generate_entities(5_000);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([rows.clone(), rows.clone()])
            .into_connection();
        let mut context = EntityContext::new(db);

        context.to_list().await.unwrap();
        context.to_list().await.unwrap();
        assert_eq!(context.count(EntryState::Unchanged), rows.len());

        context.remove_range(&rows);
        assert_eq!(context.pending().deleted, rows.len());
        assert_eq!(context.count(EntryState::Unchanged), 0);
        for row in &rows {
            assert_eq!(context.state_of(&row.id), Some(EntryState::Deleted));
        }
    }

    #[tokio::test]
    async fn cancelling_an_insert_keeps_other_entries_reachable() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let mut context = EntityContext::new(db);
        let fresh = generate_entities(4);
        context.add_range(fresh.clone());

        // The last entry is moved into the freed slot.
        context.remove_range([&fresh[1]]);
        context.remove_range([&fresh[3]]);

        assert_eq!(context.state_of(&fresh[0].id), Some(EntryState::Added));
        assert_eq!(context.state_of(&fresh[1].id), None);
        assert_eq!(context.state_of(&fresh[2].id), Some(EntryState::Added));
        assert_eq!(context.state_of(&fresh[3].id), None);
        assert_eq!(context.pending().added, 2);
    }

    #[tokio::test]
    async fn ids_resolve_after_deleted_entries_are_detached() {
        let loaded = vec![
            entity("a", "Entity 0"),
            entity("b", "Entity 1"),
            entity("c", "Entity 2"),
        ];
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([loaded.clone()])
            .append_exec_results([exec(1), exec(1)])
            .into_connection();
        let mut context = EntityContext::new(db);
        context.to_list().await.unwrap();

        context.remove_range([&loaded[0]]);
        context.save_changes().await.unwrap();

        context.entity_mut("c").unwrap().name = "renamed".to_string();
        assert_eq!(context.save_changes().await.unwrap(), 1);
        assert_eq!(context.state_of("a"), None);
        assert_eq!(context.state_of("b"), Some(EntryState::Unchanged));
        assert_eq!(context.count(EntryState::Unchanged), 2);
    }

    #[tokio::test]
    async fn failed_save_keeps_changes_pending() {
        // Empty exec buffer makes the INSERT fail.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let mut context = EntityContext::new(db);
        context.add_range(generate_entities(4));

        assert!(context.save_changes().await.is_err());
        assert_eq!(context.pending().added, 4);
    }
}
