//! Local libSQL data warehouse.
//!
//! One database file holds every source and thematic dataset. `SQLite` has
//! no schemas, so a table `t` in schema `s` is stored as `s__t`. Schema
//! membership and column comments live in two bookkeeping tables.
//!
//! [`LocalWarehouse`] plays all three collaborator roles for the CLI: it is
//! the catalog the reconciler edits, the reader extraction pulls from, and
//! the sink governed records are loaded into.

use std::sync::LazyLock;

use async_trait::async_trait;
use libsql::Builder;
use regex::Regex;
use serde_json::{Number, Value};
use tokio::sync::Mutex;

use hub_core::errors::CoreError;
use hub_core::ids::is_valid_identifier;
use hub_core::rules::source::{FilterOperator, FilterRule, SortField};
use hub_core::value::Record;

use crate::catalog::{CatalogAdapter, ColumnDefinition, TableOperation, ViewOperation};
use crate::extraction::sql::validate_select;
use crate::source::{BoundQuery, InterfaceQuery, LoadOutcome, Predicate, RecordSink, SourceReader, TargetTable};

static COLUMN_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_ ]*(\(\s*\d+\s*(,\s*\d+\s*)?\))?$")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

const BOOKKEEPING: &str = "
CREATE TABLE IF NOT EXISTS _hub_schemas (
    name TEXT PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS _hub_column_comments (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    comment TEXT NOT NULL,
    PRIMARY KEY (table_name, column_name)
);
";

fn storage_err(e: libsql::Error) -> CoreError {
    CoreError::Other(anyhow::Error::new(e).context("warehouse"))
}

fn ident(name: &str) -> Result<String, CoreError> {
    if is_valid_identifier(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(CoreError::Validation(format!("'{name}' is not a valid identifier")))
    }
}

/// Physical name of `schema.object`.
fn physical(schema: &str, name: &str) -> Result<String, CoreError> {
    ident(schema)?;
    ident(name)?;
    Ok(format!("{schema}__{name}"))
}

fn literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

fn to_sql_value(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        Value::Number(n) => n.as_i64().map_or_else(
            || libsql::Value::Real(n.as_f64().unwrap_or_default()),
            libsql::Value::Integer,
        ),
        Value::String(s) => libsql::Value::Text(s.clone()),
        other => libsql::Value::Text(other.to_string()),
    }
}

fn from_sql_value(value: libsql::Value) -> Value {
    match value {
        libsql::Value::Null => Value::Null,
        libsql::Value::Integer(i) => Value::from(i),
        libsql::Value::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        libsql::Value::Text(s) => Value::String(s),
        libsql::Value::Blob(b) => Value::String(hex::encode(b)),
    }
}

async fn collect_rows(mut rows: libsql::Rows, limit: usize) -> Result<Vec<Record>, CoreError> {
    let names: Vec<String> = (0..rows.column_count())
        .map(|i| rows.column_name(i).unwrap_or_default().to_string())
        .collect();
    let mut out = Vec::new();
    while out.len() < limit {
        let Some(row) = rows.next().await.map_err(storage_err)? else {
            break;
        };
        let mut record = Record::new();
        for (i, name) in (0_i32..).zip(&names) {
            record.insert(name.clone(), from_sql_value(row.get_value(i).map_err(storage_err)?));
        }
        out.push(record);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Predicate rendering
// ---------------------------------------------------------------------------

fn bind(params: &mut Vec<libsql::Value>, value: &Value) -> String {
    params.push(to_sql_value(value));
    format!("?{}", params.len())
}

fn bind_list(params: &mut Vec<libsql::Value>, value: &Value) -> String {
    let items = value.as_array().map_or(&[][..], Vec::as_slice);
    if items.is_empty() {
        return "NULL".into();
    }
    items
        .iter()
        .map(|v| bind(params, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_filter(rule: &FilterRule, params: &mut Vec<libsql::Value>) -> Result<String, CoreError> {
    let column = ident(&rule.field)?;
    let op = match rule.operator {
        FilterOperator::IsNull => return Ok(format!("{column} IS NULL")),
        FilterOperator::NotNull => return Ok(format!("{column} IS NOT NULL")),
        FilterOperator::In => return Ok(format!("{column} IN ({})", bind_list(params, &rule.value))),
        FilterOperator::NotIn => {
            return Ok(format!("{column} NOT IN ({})", bind_list(params, &rule.value)));
        }
        FilterOperator::Eq => "=",
        FilterOperator::Ne => "<>",
        FilterOperator::Gt => ">",
        FilterOperator::Lt => "<",
        FilterOperator::Ge => ">=",
        FilterOperator::Le => "<=",
        FilterOperator::Like => "LIKE",
    };
    Ok(format!("{column} {op} {}", bind(params, &rule.value)))
}

fn render_predicate(predicate: &Predicate, params: &mut Vec<libsql::Value>) -> Result<String, CoreError> {
    match predicate {
        Predicate::Filter(rule) => render_filter(rule, params),
        Predicate::AnyOf(inner) if inner.is_empty() => Ok("0".into()),
        Predicate::AnyOf(inner) => {
            let parts = inner
                .iter()
                .map(|p| render_predicate(p, params))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("({})", parts.join(" OR ")))
        }
    }
}

fn render_sort(sort: &[SortField]) -> Result<String, CoreError> {
    if sort.is_empty() {
        return Ok("rowid".into());
    }
    let parts = sort
        .iter()
        .map(|s| Ok(format!("{} {}", ident(&s.field)?, s.order.as_sql())))
        .collect::<Result<Vec<_>, CoreError>>()?;
    Ok(parts.join(", "))
}

fn column_ddl(column: &ColumnDefinition, single_pk: bool) -> Result<String, CoreError> {
    if !COLUMN_TYPE.is_match(column.data_type.trim()) {
        return Err(CoreError::Validation(format!(
            "column {}: '{}' is not a valid type",
            column.name, column.data_type
        )));
    }
    let mut ddl = format!("{} {}", ident(&column.name)?, column.data_type.trim());
    if single_pk && column.is_primary_key {
        ddl.push_str(" PRIMARY KEY");
    }
    if !column.is_nullable {
        ddl.push_str(" NOT NULL");
    }
    if column.is_unique && !column.is_primary_key {
        ddl.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default_value {
        ddl.push_str(" DEFAULT ");
        ddl.push_str(&literal(default));
    }
    Ok(ddl)
}

fn create_table_sql(name: &str, columns: &[ColumnDefinition]) -> Result<String, CoreError> {
    if columns.is_empty() {
        return Err(CoreError::Validation(format!("table {name} needs at least one column")));
    }
    let keys: Vec<&ColumnDefinition> = columns.iter().filter(|c| c.is_primary_key).collect();
    let mut parts = columns
        .iter()
        .map(|c| column_ddl(c, keys.len() == 1))
        .collect::<Result<Vec<_>, _>>()?;
    if keys.len() > 1 {
        let names = keys
            .iter()
            .map(|c| ident(&c.name))
            .collect::<Result<Vec<_>, _>>()?;
        parts.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }
    Ok(format!("CREATE TABLE \"{name}\" ({})", parts.join(", ")))
}

// ---------------------------------------------------------------------------
// LocalWarehouse
// ---------------------------------------------------------------------------

/// A libSQL file acting as catalog, source, and sink.
pub struct LocalWarehouse {
    #[allow(dead_code)]
    db: libsql::Database,
    conn: libsql::Connection,
    write_lock: Mutex<()>,
}

impl LocalWarehouse {
    /// Open (or create) a warehouse at `path`, or `":memory:"`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Other` if the file cannot be opened.
    pub async fn open_local(path: &str) -> Result<Self, CoreError> {
        let db = Builder::new_local(path).build().await.map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;
        conn.execute_batch(BOOKKEEPING).await.map_err(storage_err)?;
        tracing::debug!(path, "warehouse opened");
        Ok(Self {
            db,
            conn,
            write_lock: Mutex::new(()),
        })
    }

    async fn exists(&self, kind: &str, name: &str) -> Result<bool, CoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2",
                [kind, name],
            )
            .await
            .map_err(storage_err)?;
        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    async fn unique_columns(&self, table: &str) -> Result<Vec<String>, CoreError> {
        let mut indexes = self
            .conn
            .query(&format!("PRAGMA index_list(\"{table}\")"), ())
            .await
            .map_err(storage_err)?;
        let mut single = Vec::new();
        while let Some(row) = indexes.next().await.map_err(storage_err)? {
            let name: String = row.get(1).map_err(storage_err)?;
            let unique: i64 = row.get(2).map_err(storage_err)?;
            let origin: String = row.get(3).map_err(storage_err)?;
            if unique == 1 && origin != "pk" {
                single.push(name);
            }
        }
        let mut columns = Vec::new();
        for index in single {
            let mut info = self
                .conn
                .query(&format!("PRAGMA index_info(\"{index}\")"), ())
                .await
                .map_err(storage_err)?;
            let mut names = Vec::new();
            while let Some(row) = info.next().await.map_err(storage_err)? {
                names.push(row.get::<String>(2).map_err(storage_err)?);
            }
            if let [only] = names.as_slice() {
                columns.push(only.clone());
            }
        }
        Ok(columns)
    }

    async fn comments(&self, table: &str) -> Result<Vec<(String, String)>, CoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT column_name, comment FROM _hub_column_comments WHERE table_name = ?1",
                [table],
            )
            .await
            .map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push((
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<String>(1).map_err(storage_err)?,
            ));
        }
        Ok(out)
    }

    async fn store_comments(
        &self,
        tx: &libsql::Transaction,
        table: &str,
        columns: &[ColumnDefinition],
    ) -> Result<(), CoreError> {
        tx.execute("DELETE FROM _hub_column_comments WHERE table_name = ?1", [table])
            .await
            .map_err(storage_err)?;
        for column in columns {
            if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
                tx.execute(
                    "INSERT INTO _hub_column_comments (table_name, column_name, comment)
                     VALUES (?1, ?2, ?3)",
                    [table, column.name.as_str(), comment],
                )
                .await
                .map_err(storage_err)?;
            }
        }
        Ok(())
    }

    async fn rebuild_table(
        &self,
        name: &str,
        columns: &[ColumnDefinition],
    ) -> Result<(), CoreError> {
        let existing: Vec<String> = self
            .table_columns_physical(name)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let shared = columns
            .iter()
            .filter(|c| existing.contains(&c.name))
            .map(|c| ident(&c.name))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let staging = format!("{name}__rebuild");

        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let result = async {
            tx.execute(&create_table_sql(&staging, columns)?, ())
                .await
                .map_err(storage_err)?;
            if !shared.is_empty() {
                tx.execute(
                    &format!("INSERT INTO \"{staging}\" ({shared}) SELECT {shared} FROM \"{name}\""),
                    (),
                )
                .await
                .map_err(storage_err)?;
            }
            tx.execute(&format!("DROP TABLE \"{name}\""), ())
                .await
                .map_err(storage_err)?;
            tx.execute(&format!("ALTER TABLE \"{staging}\" RENAME TO \"{name}\""), ())
                .await
                .map_err(storage_err)?;
            self.store_comments(&tx, name, columns).await
        }
        .await;
        match result {
            Ok(()) => tx.commit().await.map_err(storage_err),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "warehouse rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn table_columns_physical(&self, name: &str) -> Result<Vec<ColumnDefinition>, CoreError> {
        let mut rows = self
            .conn
            .query(&format!("PRAGMA table_info(\"{name}\")"), ())
            .await
            .map_err(storage_err)?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let cid: i64 = row.get(0).map_err(storage_err)?;
            let notnull: i64 = row.get(3).map_err(storage_err)?;
            let pk: i64 = row.get(5).map_err(storage_err)?;
            let mut column = ColumnDefinition::new(
                row.get::<String>(1).map_err(storage_err)?,
                row.get::<String>(2).map_err(storage_err)?,
            );
            column.is_nullable = notnull == 0 && pk == 0;
            column.is_primary_key = pk > 0;
            column.default_value = row
                .get::<Option<String>>(4)
                .map_err(storage_err)?
                .map(|d| d.trim_matches('\'').replace("''", "'"));
            column.ordinal = u32::try_from(cid + 1).unwrap_or(u32::MAX);
            columns.push(column);
        }
        Ok(columns)
    }

    /// Run raw DDL or DML against the warehouse, e.g. to seed source tables.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Other` if any statement fails.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        self.conn.execute_batch(sql).await.map_err(storage_err)?;
        Ok(())
    }

    /// Every row of `schema.table` in storage order.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for bad names and `CoreError::Other`
    /// if the read fails.
    pub async fn rows(&self, schema: &str, table: &str) -> Result<Vec<Record>, CoreError> {
        let name = physical(schema, table)?;
        let rows = self
            .conn
            .query(&format!("SELECT * FROM \"{name}\" ORDER BY rowid"), ())
            .await
            .map_err(storage_err)?;
        collect_rows(rows, usize::MAX).await
    }
}

#[async_trait]
impl CatalogAdapter for LocalWarehouse {
    async fn schema_exists(&self, schema: &str) -> Result<bool, CoreError> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM _hub_schemas WHERE name = ?1", [schema])
            .await
            .map_err(storage_err)?;
        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    async fn create_schema(&self, schema: &str) -> Result<(), CoreError> {
        ident(schema)?;
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute("INSERT OR IGNORE INTO _hub_schemas (name) VALUES (?1)", [schema])
            .await
            .map_err(storage_err)?;
        tracing::info!(schema, "schema created");
        Ok(())
    }

    async fn delete_schema(&self, schema: &str) -> Result<(), CoreError> {
        ident(schema)?;
        let prefix = format!("{schema}__");
        let mut rows = self
            .conn
            .query(
                "SELECT type, name FROM sqlite_master
                 WHERE type IN ('table', 'view') AND substr(name, 1, length(?1)) = ?1",
                [prefix.as_str()],
            )
            .await
            .map_err(storage_err)?;
        let mut objects = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            objects.push((
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<String>(1).map_err(storage_err)?,
            ));
        }
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for (kind, name) in &objects {
            let stmt = if kind == "view" { "DROP VIEW" } else { "DROP TABLE" };
            tx.execute(&format!("{stmt} IF EXISTS \"{name}\""), ())
                .await
                .map_err(storage_err)?;
            tx.execute("DELETE FROM _hub_column_comments WHERE table_name = ?1", [name.as_str()])
                .await
                .map_err(storage_err)?;
        }
        tx.execute("DELETE FROM _hub_schemas WHERE name = ?1", [schema])
            .await
            .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;
        tracing::info!(schema, objects = objects.len(), "schema dropped");
        Ok(())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool, CoreError> {
        self.exists("table", &physical(schema, table)?).await
    }

    async fn view_exists(&self, schema: &str, view: &str) -> Result<bool, CoreError> {
        self.exists("view", &physical(schema, view)?).await
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDefinition>, CoreError> {
        let name = physical(schema, table)?;
        let mut columns = self.table_columns_physical(&name).await?;
        let unique = self.unique_columns(&name).await?;
        let comments = self.comments(&name).await?;
        for column in &mut columns {
            column.is_unique = column.is_primary_key || unique.contains(&column.name);
            column.comment = comments
                .iter()
                .find(|(c, _)| *c == column.name)
                .map(|(_, comment)| comment.clone());
        }
        Ok(columns)
    }

    async fn manage_table(&self, op: TableOperation) -> Result<(), CoreError> {
        let kind = op.kind();
        match op {
            TableOperation::Create {
                schema,
                table,
                columns,
            } => {
                if !self.schema_exists(&schema).await? {
                    return Err(CoreError::not_found("schema", schema));
                }
                let name = physical(&schema, &table)?;
                if self.exists("table", &name).await? {
                    return Err(CoreError::Conflict(format!("table {schema}.{table} exists")));
                }
                let ddl = create_table_sql(&name, &columns)?;
                let _guard = self.write_lock.lock().await;
                let tx = self.conn.transaction().await.map_err(storage_err)?;
                tx.execute(&ddl, ()).await.map_err(storage_err)?;
                self.store_comments(&tx, &name, &columns).await?;
                tx.commit().await.map_err(storage_err)?;
            }
            TableOperation::Alter {
                schema,
                table,
                columns,
            } => {
                let name = physical(&schema, &table)?;
                if !self.exists("table", &name).await? {
                    return Err(CoreError::not_found("table", format!("{schema}.{table}")));
                }
                self.rebuild_table(&name, &columns).await?;
            }
            TableOperation::Drop { schema, table } => {
                let name = physical(&schema, &table)?;
                let _guard = self.write_lock.lock().await;
                self.conn
                    .execute(&format!("DROP TABLE IF EXISTS \"{name}\""), ())
                    .await
                    .map_err(storage_err)?;
                self.conn
                    .execute("DELETE FROM _hub_column_comments WHERE table_name = ?1", [name.as_str()])
                    .await
                    .map_err(storage_err)?;
            }
        }
        tracing::debug!(op = kind, "table ddl applied");
        Ok(())
    }

    async fn manage_view(&self, op: ViewOperation) -> Result<(), CoreError> {
        match op {
            ViewOperation::CreateOrReplace { schema, view, sql } => {
                validate_select(&sql)?;
                let name = physical(&schema, &view)?;
                let _guard = self.write_lock.lock().await;
                let tx = self.conn.transaction().await.map_err(storage_err)?;
                tx.execute(&format!("DROP VIEW IF EXISTS \"{name}\""), ())
                    .await
                    .map_err(storage_err)?;
                tx.execute(&format!("CREATE VIEW \"{name}\" AS {sql}"), ())
                    .await
                    .map_err(storage_err)?;
                tx.commit().await.map_err(storage_err)?;
            }
            ViewOperation::Drop { schema, view } => {
                let name = physical(&schema, &view)?;
                let _guard = self.write_lock.lock().await;
                self.conn
                    .execute(&format!("DROP VIEW IF EXISTS \"{name}\""), ())
                    .await
                    .map_err(storage_err)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceReader for LocalWarehouse {
    async fn query_sql(&self, query: &BoundQuery, limit: usize) -> Result<Vec<Record>, CoreError> {
        validate_select(&query.sql)?;
        let params: Vec<libsql::Value> = query.params.iter().map(to_sql_value).collect();
        let rows = self
            .conn
            .query(&query.sql, libsql::params_from_iter(params))
            .await
            .map_err(storage_err)?;
        collect_rows(rows, limit).await
    }

    async fn fetch_interface(&self, query: &InterfaceQuery) -> Result<Vec<Record>, CoreError> {
        let name = physical(&query.library_id, &query.interface_id)?;
        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM \"{name}\"");
        if !query.predicates.is_empty() {
            let clauses = query
                .predicates
                .iter()
                .map(|p| render_predicate(p, &mut params))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&render_sort(&query.sort)?);
        params.push(libsql::Value::Integer(i64::try_from(query.limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ?{}", params.len()));
        params.push(libsql::Value::Integer(i64::try_from(query.offset).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" OFFSET ?{}", params.len()));

        let rows = self
            .conn
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(storage_err)?;
        collect_rows(rows, query.limit).await
    }
}

#[async_trait]
impl RecordSink for LocalWarehouse {
    async fn upsert(
        &self,
        target: &TargetTable,
        key_fields: &[String],
        records: &[Record],
    ) -> Result<LoadOutcome, CoreError> {
        let name = physical(&target.schema, &target.table)?;
        let known: Vec<String> = self
            .table_columns_physical(&name)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        if known.is_empty() {
            return Err(CoreError::not_found("table", target.to_string()));
        }
        let keys: Vec<&String> = key_fields.iter().filter(|k| known.contains(k)).collect();

        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let mut outcome = LoadOutcome::default();
        for record in records {
            let fields: Vec<(&String, &Value)> =
                record.iter().filter(|(k, _)| known.contains(k)).collect();
            if fields.is_empty() {
                continue;
            }
            let key_present = !keys.is_empty()
                && keys
                    .iter()
                    .all(|k| record.get(k.as_str()).is_some_and(|v| !v.is_null()));
            if key_present {
                let mut params: Vec<libsql::Value> = Vec::new();
                let mut sets = Vec::new();
                for (field, value) in &fields {
                    params.push(to_sql_value(value));
                    sets.push(format!("{} = ?{}", ident(field)?, params.len()));
                }
                let mut wheres = Vec::new();
                for key in &keys {
                    params.push(to_sql_value(&record[key.as_str()]));
                    wheres.push(format!("{} = ?{}", ident(key)?, params.len()));
                }
                let changed = tx
                    .execute(
                        &format!(
                            "UPDATE \"{name}\" SET {} WHERE {}",
                            sets.join(", "),
                            wheres.join(" AND ")
                        ),
                        libsql::params_from_iter(params),
                    )
                    .await
                    .map_err(storage_err)?;
                if changed > 0 {
                    outcome.updated += 1;
                    continue;
                }
            }
            let columns = fields
                .iter()
                .map(|(f, _)| ident(f))
                .collect::<Result<Vec<_>, _>>()?;
            let holders: Vec<String> = (1..=fields.len()).map(|i| format!("?{i}")).collect();
            let params: Vec<libsql::Value> = fields.iter().map(|(_, v)| to_sql_value(v)).collect();
            tx.execute(
                &format!(
                    "INSERT INTO \"{name}\" ({}) VALUES ({})",
                    columns.join(", "),
                    holders.join(", ")
                ),
                libsql::params_from_iter(params),
            )
            .await
            .map_err(storage_err)?;
            outcome.inserted += 1;
        }
        tx.commit().await.map_err(storage_err)?;
        tracing::debug!(
            target = %target,
            inserted = outcome.inserted,
            updated = outcome.updated,
            "records loaded"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::rules::source::SortOrder;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn warehouse() -> LocalWarehouse {
        LocalWarehouse::open_local(":memory:").await.unwrap()
    }

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn residents() -> Vec<ColumnDefinition> {
        let mut id = ColumnDefinition::new("id", "INTEGER");
        id.is_primary_key = true;
        let mut email = ColumnDefinition::new("email", "varchar(255)");
        email.is_unique = true;
        email.comment = Some("Email - primary contact address".into());
        vec![id, email, ColumnDefinition::new("name", "TEXT")]
    }

    #[tokio::test]
    async fn create_and_introspect_table() {
        let wh = warehouse().await;
        wh.create_schema("population").await.unwrap();
        wh.manage_table(TableOperation::Create {
            schema: "population".into(),
            table: "residents".into(),
            columns: residents(),
        })
        .await
        .unwrap();

        assert!(wh.table_exists("population", "residents").await.unwrap());
        let columns = wh.table_columns("population", "residents").await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "name"]);
        assert!(columns[0].is_primary_key && !columns[0].is_nullable);
        assert!(columns[1].is_unique);
        assert_eq!(columns[1].data_type, "varchar(255)");
        assert_eq!(columns[1].comment.as_deref(), Some("Email - primary contact address"));
        assert_eq!(columns[2].ordinal, 3);
    }

    #[tokio::test]
    async fn alter_keeps_shared_columns() {
        let wh = warehouse().await;
        wh.create_schema("s").await.unwrap();
        wh.manage_table(TableOperation::Create {
            schema: "s".into(),
            table: "t".into(),
            columns: residents(),
        })
        .await
        .unwrap();
        let target = TargetTable::new("s", "t");
        wh.upsert(&target, &["id".into()], &[rec(json!({"id": 1, "email": "a@x.io", "name": "A"}))])
            .await
            .unwrap();

        let mut columns = residents();
        columns.remove(2);
        columns.push(ColumnDefinition::new("age", "INTEGER"));
        wh.manage_table(TableOperation::Alter {
            schema: "s".into(),
            table: "t".into(),
            columns,
        })
        .await
        .unwrap();

        let rows = wh.rows("s", "t").await.unwrap();
        assert_eq!(rows, vec![rec(json!({"id": 1, "email": "a@x.io", "age": null}))]);
    }

    #[tokio::test]
    async fn upsert_updates_on_key() {
        let wh = warehouse().await;
        wh.create_schema("s").await.unwrap();
        wh.manage_table(TableOperation::Create {
            schema: "s".into(),
            table: "t".into(),
            columns: residents(),
        })
        .await
        .unwrap();
        let target = TargetTable::new("s", "t");
        let first = wh
            .upsert(
                &target,
                &["id".into()],
                &[
                    rec(json!({"id": 1, "email": "a@x.io", "ignored": true})),
                    rec(json!({"id": 2, "email": "b@x.io"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(first, LoadOutcome { inserted: 2, updated: 0 });

        let second = wh
            .upsert(&target, &["id".into()], &[rec(json!({"id": 1, "name": "Ada"}))])
            .await
            .unwrap();
        assert_eq!(second, LoadOutcome { inserted: 0, updated: 1 });
        assert_eq!(wh.rows("s", "t").await.unwrap()[0]["name"], json!("Ada"));
    }

    #[tokio::test]
    async fn fetch_binds_predicates_and_pages() {
        let wh = warehouse().await;
        wh.execute_batch(
            "CREATE TABLE raw__people (id INTEGER, updated_at TEXT, deleted INTEGER);
             INSERT INTO raw__people VALUES
               (1, '2024-01-01T00:00:00Z', NULL),
               (2, '2024-01-03T00:00:00Z', NULL),
               (3, '2024-01-04T00:00:00Z', 1),
               (4, '2024-01-05T00:00:00Z', NULL);",
        )
        .await
        .unwrap();
        let query = InterfaceQuery {
            library_id: "raw".into(),
            interface_id: "people".into(),
            predicates: vec![
                Predicate::Filter(FilterRule::new(
                    "updated_at",
                    FilterOperator::Gt,
                    json!("2024-01-02T00:00:00Z"),
                )),
                Predicate::Filter(FilterRule::new("deleted", FilterOperator::IsNull, Value::Null)),
            ],
            sort: vec![SortField {
                field: "id".into(),
                order: SortOrder::Desc,
            }],
            limit: 1,
            offset: 1,
        };
        let page = wh.fetch_interface(&query).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn rejects_unsafe_names_and_writes() {
        let wh = warehouse().await;
        let query = InterfaceQuery {
            library_id: "raw; DROP".into(),
            interface_id: "people".into(),
            predicates: Vec::new(),
            sort: Vec::new(),
            limit: 10,
            offset: 0,
        };
        assert!(matches!(
            wh.fetch_interface(&query).await,
            Err(CoreError::Validation(_))
        ));
        let write = BoundQuery {
            sql: "DELETE FROM raw__people".into(),
            params: Vec::new(),
        };
        assert!(matches!(wh.query_sql(&write, 10).await, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn views_replace_and_drop() {
        let wh = warehouse().await;
        wh.execute_batch("CREATE TABLE s__t (id INTEGER); INSERT INTO s__t VALUES (1), (2);")
            .await
            .unwrap();
        wh.manage_view(ViewOperation::CreateOrReplace {
            schema: "s".into(),
            view: "v".into(),
            sql: "SELECT id FROM s__t WHERE id > 1".into(),
        })
        .await
        .unwrap();
        assert!(wh.view_exists("s", "v").await.unwrap());
        wh.manage_view(ViewOperation::Drop {
            schema: "s".into(),
            view: "v".into(),
        })
        .await
        .unwrap();
        assert!(!wh.view_exists("s", "v").await.unwrap());
    }
}
