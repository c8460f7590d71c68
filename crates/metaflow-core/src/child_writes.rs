//! Child-Write Executor (§4.5): applies diff/replace/append to 1-N, 1-1
//! and N-N relations under the parent's transaction. Never recurses into
//! nested grandchildren — only the direct `data` array of one relation is
//! processed, by design (§9: cyclic metadata is allowed, recursion is not).

use std::collections::{HashMap, HashSet};

use metaflow_domain::{EntityDescriptor, RelationDescriptor};
use serde_json::Value as JsonValue;

use crate::errors::EngineError;
use crate::planner::{ChildOp, WriteMode};
use crate::store::{EntityStore, Record};

pub async fn execute<S: EntityStore>(
    store: &S,
    tx: &mut S::Tx,
    relation: &RelationDescriptor,
    target_entity: &EntityDescriptor,
    parent_id: &str,
    op: &ChildOp,
) -> Result<(), EngineError> {
    if relation.is_many_to_many() {
        execute_join(store, tx, relation, parent_id, op).await
    } else {
        execute_fk(store, tx, relation, target_entity, parent_id, op).await
    }
}

fn row_id(row: &Record, pk_field: &str) -> Option<String> {
    match row.get(pk_field) {
        Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn row_is_delete(row: &Record) -> bool {
    matches!(row.get("_delete"), Some(JsonValue::Bool(true)))
}

async fn execute_fk<S: EntityStore>(
    store: &S,
    tx: &mut S::Tx,
    relation: &RelationDescriptor,
    target_entity: &EntityDescriptor,
    parent_id: &str,
    op: &ChildOp,
) -> Result<(), EngineError> {
    match op.mode {
        WriteMode::Append => {
            for row in &op.data {
                // "ignore rows with a PK" (§4.5 append mode).
                if row_id(row, &target_entity.primary_key).is_some() {
                    continue;
                }
                store
                    .insert_child(tx, relation, target_entity, parent_id, row)
                    .await?;
            }
            Ok(())
        }
        WriteMode::Diff | WriteMode::Replace => {
            let current = store
                .fetch_children(tx, relation, target_entity, parent_id)
                .await?;
            let current_index: HashMap<String, Record> = current
                .into_iter()
                .filter_map(|r| row_id(&r, &target_entity.primary_key).map(|id| (id, r)))
                .collect();
            let mut touched: HashSet<String> = HashSet::new();

            for row in &op.data {
                let pk = row_id(row, &target_entity.primary_key);
                match pk {
                    Some(id) => {
                        // "PKs not in current set are skipped."
                        if !current_index.contains_key(&id) {
                            continue;
                        }
                        if row_is_delete(row) {
                            if target_entity.soft_delete {
                                store.soft_delete_child(tx, target_entity, &id).await?;
                            } else {
                                store.hard_delete_child(tx, target_entity, &id).await?;
                            }
                        } else {
                            store.update_child(tx, target_entity, &id, row).await?;
                        }
                        touched.insert(id);
                    }
                    None => {
                        // `_delete=true` with no PK is silently ignored,
                        // not inserted (§9 open question, preserved).
                        if row_is_delete(row) {
                            continue;
                        }
                        store
                            .insert_child(tx, relation, target_entity, parent_id, row)
                            .await?;
                    }
                }
            }

            if op.mode == WriteMode::Replace {
                for (id, _) in current_index.iter().filter(|(id, _)| !touched.contains(*id)) {
                    store.soft_delete_child(tx, target_entity, id).await?;
                }
            }

            Ok(())
        }
    }
}

/// N-N join rows carry the target id under `"id"` and an optional
/// `"_delete"` flag, matching the shallow row shape §4.5 requires (no
/// nested grandchildren).
async fn execute_join<S: EntityStore>(
    store: &S,
    tx: &mut S::Tx,
    relation: &RelationDescriptor,
    source_id: &str,
    op: &ChildOp,
) -> Result<(), EngineError> {
    match op.mode {
        WriteMode::Replace => {
            store.delete_all_join_rows(tx, relation, source_id).await?;
            for row in &op.data {
                if let Some(target_id) = row_id(row, "id") {
                    store.insert_join_row(tx, relation, source_id, &target_id).await?;
                }
            }
            Ok(())
        }
        WriteMode::Append => {
            for row in &op.data {
                if let Some(target_id) = row_id(row, "id") {
                    store.insert_join_row(tx, relation, source_id, &target_id).await?;
                }
            }
            Ok(())
        }
        WriteMode::Diff => {
            let current = store.fetch_join_targets(tx, relation, source_id).await?;
            let current_set: HashSet<String> = current.into_iter().collect();
            for row in &op.data {
                let Some(target_id) = row_id(row, "id") else {
                    continue;
                };
                if row_is_delete(row) {
                    if current_set.contains(&target_id) {
                        store.delete_join_row(tx, relation, source_id, &target_id).await?;
                    }
                } else if !current_set.contains(&target_id) {
                    store.insert_join_row(tx, relation, source_id, &target_id).await?;
                }
            }
            Ok(())
        }
    }
}
