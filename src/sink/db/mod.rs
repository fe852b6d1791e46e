use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tracing::info;

use crate::config::DbTarget;
use crate::error::SinkError;
use crate::model::{Entity, EntityKind};
use crate::source::CampaignForm;

pub mod dialect;
pub mod pool;
pub mod schema;
pub mod value;

use dialect::{for_backend, SqlDialect};
use pool::DbPool;
use schema::{Column, TableSchemas};
use value::{coerce, SqlValue};

/// Dialect-aware upsert engine over one target database. Rows are filtered
/// to their table's schema, coerced, and written with an idempotent
/// per-`$id` upsert; generated statements are cached per column set.
pub struct Upserter {
    pool: DbPool,
    dialect: &'static dyn SqlDialect,
    schemas: TableSchemas,
    statements: Mutex<HashMap<(EntityKind, String), String>>,
}

impl Upserter {
    /// Connects, synthesizes the contact schema from the campaign form and
    /// creates or additively evolves the four entity tables. Any failure
    /// here aborts startup.
    pub async fn bootstrap(
        target: &DbTarget,
        max_connections: u32,
        form: &CampaignForm,
    ) -> Result<Self, SinkError> {
        let pool = DbPool::connect(target, max_connections).await?;
        let dialect = for_backend(target.backend);
        let mut schemas = TableSchemas::base();
        schemas.extend_from_form(form);
        sync_schema(&pool, dialect, &schemas).await?;
        Ok(Self {
            pool,
            dialect,
            schemas,
            statements: Mutex::new(HashMap::new()),
        })
    }

    /// Idempotently writes one entity row.
    pub async fn upsert(&self, entity: &Entity) -> Result<(), SinkError> {
        let (columns, values) = self.row_for(entity);
        let id = entity
            .data
            .get("$id")
            .and_then(Value::as_str)
            .ok_or(SinkError::MissingId)?;
        let sql = self.statement(entity.kind, &columns);
        let params = upsert_params(self.dialect, id, values);
        self.pool.execute(&sql, &params).await
    }

    /// Filters the row down to its table's columns, in schema order so the
    /// statement cache actually hits. Empty strings on contact rows are
    /// dropped: a partial update must not blank out user fields.
    fn row_for(&self, entity: &Entity) -> (Vec<String>, Vec<SqlValue>) {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for column in self.schemas.for_kind(entity.kind) {
            let Some(raw) = entity.data.get(&column.name) else {
                continue;
            };
            let Some(value) = coerce(raw) else {
                continue;
            };
            if entity.kind == EntityKind::Contact && value.is_empty_text() {
                continue;
            }
            columns.push(column.name.clone());
            values.push(value);
        }
        (columns, values)
    }

    fn statement(&self, kind: EntityKind, columns: &[String]) -> String {
        let key = (kind, columns.join(","));
        let mut cache = self.statements.lock().expect("statement cache lock");
        cache
            .entry(key)
            .or_insert_with(|| self.dialect.upsert(kind.table(), columns))
            .clone()
    }
}

/// Insert list plus update list; the MERGE form additionally leads with
/// the `$id` match value.
fn upsert_params(dialect: &dyn SqlDialect, id: &str, values: Vec<SqlValue>) -> Vec<SqlValue> {
    let mut params = Vec::with_capacity(values.len() * 2 + 1);
    if dialect.name() == "sqlserver" {
        params.push(SqlValue::Text(id.to_owned()));
    }
    params.extend(values.iter().cloned());
    params.extend(values);
    params
}

async fn sync_schema(
    pool: &DbPool,
    dialect: &'static dyn SqlDialect,
    schemas: &TableSchemas,
) -> Result<(), SinkError> {
    for (table, columns) in schemas.tables() {
        pool.execute(&dialect.create_table(table, columns), &[])
            .await?;
    }

    // tables created by an earlier run predate this campaign form; widen
    let table = EntityKind::Contact.table();
    let existing = pool
        .fetch_strings(&dialect.table_columns_query(table))
        .await?;
    let missing: Vec<Column> = schemas
        .contact
        .iter()
        .filter(|col| !existing.iter().any(|name| name == &col.name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        info!(count = missing.len(), "adding contact columns");
        pool.execute(&dialect.add_columns(table, &missing), &[])
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::dialect::SqlServerDialect;
    use serde_json::json;

    fn test_upserter() -> Upserter {
        let lazy = sqlx::mysql::MySqlPoolOptions::new()
            .connect_lazy("mysql://u:p@localhost/db")
            .unwrap();
        Upserter {
            pool: DbPool::MySql(lazy),
            dialect: for_backend(crate::config::DbBackend::MySql),
            schemas: TableSchemas::base(),
            statements: Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn params_double_the_values() {
        let values = vec![SqlValue::Text("a".to_owned()), SqlValue::Int(1)];
        let params = upsert_params(for_backend(crate::config::DbBackend::MySql), "a", values);
        assert_eq!(
            params,
            vec![
                SqlValue::Text("a".to_owned()),
                SqlValue::Int(1),
                SqlValue::Text("a".to_owned()),
                SqlValue::Int(1),
            ]
        );
    }

    #[test]
    fn merge_params_lead_with_the_id() {
        let values = vec![
            SqlValue::Text("a".to_owned()),
            SqlValue::Int(1),
            SqlValue::Bool(true),
        ];
        let params = upsert_params(&SqlServerDialect, "a", values);
        assert_eq!(params.len(), 7);
        assert_eq!(params[0], SqlValue::Text("a".to_owned()));
        assert_eq!(&params[1..4], &params[4..7]);
    }

    #[tokio::test]
    async fn rows_are_filtered_to_schema_columns() {
        let upserter = test_upserter();
        let entity = Entity {
            kind: EntityKind::Recording,
            data: json!({
                "$id": "r1",
                "$connection_id": "c1",
                "location": "https://store/r1.wav",
                "unexpected": "dropped",
                "stopped": null,
            })
            .as_object()
            .cloned()
            .unwrap(),
        };
        let (columns, values) = upserter.row_for(&entity);
        assert_eq!(columns, vec!["$id", "$connection_id", "location"]);
        assert_eq!(values.len(), 3);
    }

    #[tokio::test]
    async fn contact_rows_drop_empty_strings() {
        let upserter = test_upserter();
        let entity = Entity {
            kind: EntityKind::Contact,
            data: json!({"$id": "c1", "$phone": "", "$task": "fc_main"})
                .as_object()
                .cloned()
                .unwrap(),
        };
        let (columns, _) = upserter.row_for(&entity);
        assert_eq!(columns, vec!["$id", "$task"]);
    }

    #[tokio::test]
    async fn statements_are_cached_per_column_set() {
        let upserter = test_upserter();
        let columns = vec!["$id".to_owned(), "fired".to_owned()];
        let first = upserter.statement(EntityKind::Transaction, &columns);
        let second = upserter.statement(EntityKind::Transaction, &columns);
        assert_eq!(first, second);
        assert_eq!(upserter.statements.lock().unwrap().len(), 1);
        upserter.statement(EntityKind::Connection, &columns);
        assert_eq!(upserter.statements.lock().unwrap().len(), 2);
    }
}
