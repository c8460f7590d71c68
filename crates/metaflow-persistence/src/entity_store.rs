//! Postgres implementation of `metaflow_core::EntityStore`. Entity tables
//! are described entirely by the registry at runtime, so every query here
//! is built dynamically from an `EntityDescriptor`/`RelationDescriptor`
//! rather than generated by a compile-time schema macro.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaflow_core::errors::EngineError;
use metaflow_core::store::{EntityStore, Record};
use metaflow_domain::{EntityDescriptor, FieldType, RelationDescriptor};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, Transaction};

use crate::error::PersistenceError;

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Binds one JSON value onto a query, picking the Postgres wire type from
/// the field's declared `FieldType` rather than the JSON variant alone —
/// `Number` fields cover both integer and floating-point columns, and a
/// JSON `null` still has to bind as a typed `None`.
fn bind_value<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    field_type: FieldType,
    value: &'q JsonValue,
) -> Query<'q, Postgres, PgArguments> {
    if value.is_null() {
        return match field_type {
            FieldType::String | FieldType::Enum | FieldType::File => q.bind(None::<String>),
            FieldType::Number => q.bind(None::<f64>),
            FieldType::Boolean => q.bind(None::<bool>),
            FieldType::DateTime => q.bind(None::<DateTime<Utc>>),
            FieldType::Json => q.bind(None::<sqlx::types::Json<JsonValue>>),
        };
    }
    match field_type {
        FieldType::String | FieldType::Enum | FieldType::File => {
            q = q.bind(value.as_str().map(str::to_string));
        }
        FieldType::Number => {
            q = q.bind(value.as_f64());
        }
        FieldType::Boolean => {
            q = q.bind(value.as_bool());
        }
        FieldType::DateTime => {
            let parsed = value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            q = q.bind(parsed);
        }
        FieldType::Json => {
            q = q.bind(sqlx::types::Json(value.clone()));
        }
    }
    q
}

fn decode_column(row: &sqlx::postgres::PgRow, name: &str, field_type: FieldType) -> Result<JsonValue, EngineError> {
    let decoded = match field_type {
        FieldType::String | FieldType::Enum | FieldType::File => row
            .try_get::<Option<String>, _>(name)
            .map(|v| v.map(JsonValue::String)),
        FieldType::Number => row.try_get::<Option<f64>, _>(name).map(|v| {
            v.and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
        }),
        FieldType::Boolean => row.try_get::<Option<bool>, _>(name).map(|v| v.map(JsonValue::Bool)),
        FieldType::DateTime => row
            .try_get::<Option<DateTime<Utc>>, _>(name)
            .map(|v| v.map(|dt| JsonValue::String(dt.to_rfc3339()))),
        FieldType::Json => row
            .try_get::<Option<sqlx::types::Json<JsonValue>>, _>(name)
            .map(|v| v.map(|j| j.0)),
    };
    decoded
        .map(|v| v.unwrap_or(JsonValue::Null))
        .map_err(|e| EngineError::from(PersistenceError::from(e)))
}

fn row_to_record(row: &sqlx::postgres::PgRow, entity: &EntityDescriptor) -> Result<Record, EngineError> {
    let mut record = Record::new();
    for field in &entity.fields {
        record.insert(field.name.clone(), decode_column(row, &field.name, field.field_type)?);
    }
    Ok(record)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', ""))
}

#[async_trait]
impl EntityStore for PgEntityStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, EngineError> {
        self.pool.begin().await.map_err(|e| EngineError::from(PersistenceError::from(e)))
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), EngineError> {
        tx.commit().await.map_err(|e| EngineError::from(PersistenceError::from(e)))
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), EngineError> {
        tx.rollback().await.map_err(|e| EngineError::from(PersistenceError::from(e)))
    }

    async fn fetch_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        id: &str,
    ) -> Result<Option<Record>, EngineError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1{}",
            quote_ident(&entity.table_name),
            quote_ident(&entity.primary_key),
            if entity.soft_delete { " AND deleted_at IS NULL" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        row.map(|r| row_to_record(&r, entity)).transpose()
    }

    async fn insert_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        fields: &Record,
    ) -> Result<Record, EngineError> {
        let cols: Vec<&str> = fields.keys().map(String::as_str).collect();
        let col_list = cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=cols.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            quote_ident(&entity.table_name),
            col_list,
            placeholders
        );
        let mut q = sqlx::query(&sql);
        for col in &cols {
            let field = entity
                .field(col)
                .ok_or_else(|| EngineError::UnknownField((*col).to_string()))?;
            q = bind_value(q, field.field_type, &fields[*col]);
        }
        let row = q
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        row_to_record(&row, entity)
    }

    async fn update_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        id: &str,
        fields: &Record,
    ) -> Result<Record, EngineError> {
        let cols: Vec<&str> = fields.keys().map(String::as_str).collect();
        let set_clause = cols
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let pk_placeholder = cols.len() + 1;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ${} RETURNING *",
            quote_ident(&entity.table_name),
            set_clause,
            quote_ident(&entity.primary_key),
            pk_placeholder
        );
        let mut q = sqlx::query(&sql);
        for col in &cols {
            let field = entity
                .field(col)
                .ok_or_else(|| EngineError::UnknownField((*col).to_string()))?;
            q = bind_value(q, field.field_type, &fields[*col]);
        }
        q = q.bind(id);
        let row = q
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        row_to_record(&row, entity)
    }

    async fn soft_delete_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        id: &str,
    ) -> Result<(), EngineError> {
        let sql = format!(
            "UPDATE {} SET deleted_at = now() WHERE {} = $1",
            quote_ident(&entity.table_name),
            quote_ident(&entity.primary_key)
        );
        sqlx::query(&sql)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(())
    }

    async fn hard_delete_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        id: &str,
    ) -> Result<(), EngineError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_ident(&entity.table_name),
            quote_ident(&entity.primary_key)
        );
        sqlx::query(&sql)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(())
    }

    async fn fetch_children(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        target_entity: &EntityDescriptor,
        parent_id: &str,
    ) -> Result<Vec<Record>, EngineError> {
        let fk = relation
            .target_foreign_key
            .as_deref()
            .ok_or_else(|| EngineError::Internal(format!("relation {} has no target_foreign_key", relation.name)))?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1{}",
            quote_ident(&target_entity.table_name),
            quote_ident(fk),
            if target_entity.soft_delete { " AND deleted_at IS NULL" } else { "" }
        );
        let rows = sqlx::query(&sql)
            .bind(parent_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        rows.iter().map(|r| row_to_record(r, target_entity)).collect()
    }

    async fn insert_child(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        target_entity: &EntityDescriptor,
        parent_id: &str,
        fields: &Record,
    ) -> Result<Record, EngineError> {
        let fk = relation
            .target_foreign_key
            .as_deref()
            .ok_or_else(|| EngineError::Internal(format!("relation {} has no target_foreign_key", relation.name)))?;
        let mut full = fields.clone();
        full.insert(fk.to_string(), JsonValue::String(parent_id.to_string()));
        self.insert_record(tx, target_entity, &full).await
    }

    async fn update_child(
        &self,
        tx: &mut Self::Tx,
        target_entity: &EntityDescriptor,
        child_id: &str,
        fields: &Record,
    ) -> Result<Record, EngineError> {
        self.update_record(tx, target_entity, child_id, fields).await
    }

    async fn soft_delete_child(
        &self,
        tx: &mut Self::Tx,
        target_entity: &EntityDescriptor,
        child_id: &str,
    ) -> Result<(), EngineError> {
        self.soft_delete_record(tx, target_entity, child_id).await
    }

    async fn hard_delete_child(
        &self,
        tx: &mut Self::Tx,
        target_entity: &EntityDescriptor,
        child_id: &str,
    ) -> Result<(), EngineError> {
        self.hard_delete_record(tx, target_entity, child_id).await
    }

    async fn set_child_fk_null(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        target_entity: &EntityDescriptor,
        child_id: &str,
    ) -> Result<(), EngineError> {
        let fk = relation
            .target_foreign_key
            .as_deref()
            .ok_or_else(|| EngineError::Internal(format!("relation {} has no target_foreign_key", relation.name)))?;
        let sql = format!(
            "UPDATE {} SET {} = NULL WHERE {} = $1",
            quote_ident(&target_entity.table_name),
            quote_ident(fk),
            quote_ident(&target_entity.primary_key)
        );
        sqlx::query(&sql)
            .bind(child_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(())
    }

    async fn count_active_children(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        target_entity: &EntityDescriptor,
        parent_id: &str,
    ) -> Result<i64, EngineError> {
        let fk = relation
            .target_foreign_key
            .as_deref()
            .ok_or_else(|| EngineError::Internal(format!("relation {} has no target_foreign_key", relation.name)))?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = $1{}",
            quote_ident(&target_entity.table_name),
            quote_ident(fk),
            if target_entity.soft_delete { " AND deleted_at IS NULL" } else { "" }
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(parent_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(count)
    }

    async fn fetch_join_targets(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        source_id: &str,
    ) -> Result<Vec<String>, EngineError> {
        let join = relation
            .join_table
            .as_ref()
            .ok_or_else(|| EngineError::Internal(format!("relation {} has no join_table", relation.name)))?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            quote_ident(&join.target_column),
            quote_ident(&join.table_name),
            quote_ident(&join.source_column)
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(source_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn insert_join_row(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        source_id: &str,
        target_id: &str,
    ) -> Result<(), EngineError> {
        let join = relation
            .join_table
            .as_ref()
            .ok_or_else(|| EngineError::Internal(format!("relation {} has no join_table", relation.name)))?;
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            quote_ident(&join.table_name),
            quote_ident(&join.source_column),
            quote_ident(&join.target_column)
        );
        sqlx::query(&sql)
            .bind(source_id)
            .bind(target_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(())
    }

    async fn delete_join_row(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        source_id: &str,
        target_id: &str,
    ) -> Result<(), EngineError> {
        let join = relation
            .join_table
            .as_ref()
            .ok_or_else(|| EngineError::Internal(format!("relation {} has no join_table", relation.name)))?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = $2",
            quote_ident(&join.table_name),
            quote_ident(&join.source_column),
            quote_ident(&join.target_column)
        );
        sqlx::query(&sql)
            .bind(source_id)
            .bind(target_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(())
    }

    async fn delete_all_join_rows(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        source_id: &str,
    ) -> Result<(), EngineError> {
        let join = relation
            .join_table
            .as_ref()
            .ok_or_else(|| EngineError::Internal(format!("relation {} has no join_table", relation.name)))?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_ident(&join.table_name),
            quote_ident(&join.source_column)
        );
        sqlx::query(&sql)
            .bind(source_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(())
    }

    async fn fetch_file_metadata(
        &self,
        tx: &mut Self::Tx,
        file_id: &str,
    ) -> Result<Option<Record>, EngineError> {
        let row = sqlx::query("SELECT * FROM _files WHERE id = $1")
            .bind(file_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        let Some(row) = row else { return Ok(None) };
        let mut record = Record::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let name = column.name().to_string();
            let value: JsonValue = row
                .try_get::<Option<String>, _>(idx)
                .map(|v| v.map(JsonValue::String).unwrap_or(JsonValue::Null))
                .unwrap_or(JsonValue::Null);
            record.insert(name, value);
        }
        Ok(Some(record))
    }

    async fn set_field(
        &self,
        entity: &EntityDescriptor,
        id: &str,
        field: &str,
        value: JsonValue,
    ) -> Result<(), EngineError> {
        let field_desc = entity
            .field(field)
            .ok_or_else(|| EngineError::UnknownField(field.to_string()))?;
        let sql = format!(
            "UPDATE {} SET {} = $1 WHERE {} = $2",
            quote_ident(&entity.table_name),
            quote_ident(field),
            quote_ident(&entity.primary_key)
        );
        let mut q = sqlx::query(&sql);
        q = bind_value(q, field_desc.field_type, &value);
        q = q.bind(id);
        q.execute(&self.pool)
            .await
            .map_err(|e| EngineError::from(PersistenceError::from(e)))?;
        Ok(())
    }
}
