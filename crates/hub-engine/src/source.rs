//! Data movement collaborators: where records are read from and loaded into.
//!
//! The orchestrator plans what to read and does governance itself; the raw
//! I/O goes through [`SourceReader`] and [`RecordSink`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use hub_core::errors::CoreError;
use hub_core::rules::source::{FilterRule, SortField, SortOrder};
use hub_core::value::{Record, compare_values};

/// A structured row predicate. Values are always bound, never spliced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Filter(FilterRule),
    /// Matches when any inner predicate matches.
    AnyOf(Vec<Predicate>),
}

impl Predicate {
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Filter(rule) => rule.matches(record),
            Self::AnyOf(inner) => inner.iter().any(|p| p.matches(record)),
        }
    }
}

/// One page request against a source interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceQuery {
    pub library_id: String,
    pub interface_id: String,
    /// All must match.
    pub predicates: Vec<Predicate>,
    pub sort: Vec<SortField>,
    pub limit: usize,
    pub offset: usize,
}

/// A validated SELECT with positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Run a read-only query, returning at most `limit` rows.
    async fn query_sql(&self, query: &BoundQuery, limit: usize) -> Result<Vec<Record>, CoreError>;

    /// Fetch one page of a source interface.
    async fn fetch_interface(&self, query: &InterfaceQuery) -> Result<Vec<Record>, CoreError>;
}

/// Physical location of a thematic table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetTable {
    pub schema: String,
    pub table: String,
}

impl TargetTable {
    #[must_use]
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TargetTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub inserted: u64,
    pub updated: u64,
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert records, updating rows whose `key_fields` already exist.
    /// With no key fields every record is inserted.
    async fn upsert(
        &self,
        target: &TargetTable,
        key_fields: &[String],
        records: &[Record],
    ) -> Result<LoadOutcome, CoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SourceState {
    sql_results: BTreeMap<String, Vec<Record>>,
    interfaces: BTreeMap<(String, String), Vec<Record>>,
    sql_log: Vec<BoundQuery>,
    interface_log: Vec<InterfaceQuery>,
}

/// Canned source data keyed by SQL text or `(library, interface)`.
#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<SourceState>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sql(self, sql: &str, rows: Vec<Record>) -> Self {
        self.lock().sql_results.insert(sql.to_string(), rows);
        self
    }

    #[must_use]
    pub fn with_interface(self, library_id: &str, interface_id: &str, rows: Vec<Record>) -> Self {
        self.lock()
            .interfaces
            .insert((library_id.to_string(), interface_id.to_string()), rows);
        self
    }

    #[must_use]
    pub fn sql_log(&self) -> Vec<BoundQuery> {
        self.lock().sql_log.clone()
    }

    #[must_use]
    pub fn interface_log(&self) -> Vec<InterfaceQuery> {
        self.lock().interface_log.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn query_sql(&self, query: &BoundQuery, limit: usize) -> Result<Vec<Record>, CoreError> {
        let mut state = self.lock();
        state.sql_log.push(query.clone());
        let rows = state
            .sql_results
            .get(&query.sql)
            .ok_or_else(|| CoreError::Validation(format!("no such query: {}", query.sql)))?;
        Ok(rows.iter().take(limit).cloned().collect())
    }

    async fn fetch_interface(&self, query: &InterfaceQuery) -> Result<Vec<Record>, CoreError> {
        let mut state = self.lock();
        state.interface_log.push(query.clone());
        let rows = state
            .interfaces
            .get(&(query.library_id.clone(), query.interface_id.clone()))
            .ok_or_else(|| {
                CoreError::not_found(
                    "source interface",
                    format!("{}.{}", query.library_id, query.interface_id),
                )
            })?;
        let mut matched: Vec<Record> = rows
            .iter()
            .filter(|r| query.predicates.iter().all(|p| p.matches(r)))
            .cloned()
            .collect();
        sort_records(&mut matched, &query.sort);
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}

/// Stable multi-key sort.
pub fn sort_records(records: &mut [Record], sort: &[SortField]) {
    if sort.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for field in sort {
            let left = a.get(&field.field).unwrap_or(&Value::Null);
            let right = b.get(&field.field).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = match field.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Target tables held in memory, keyed by `schema.table`.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<BTreeMap<String, Vec<Record>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rows(&self, target: &TargetTable) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&target.to_string())
            .cloned()
            .unwrap_or_default()
    }
}

fn same_key(a: &Record, b: &Record, key_fields: &[String]) -> bool {
    key_fields.iter().all(|field| {
        let (x, y) = (a.get(field), b.get(field));
        x.is_some() && x == y
    })
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert(
        &self,
        target: &TargetTable,
        key_fields: &[String],
        records: &[Record],
    ) -> Result<LoadOutcome, CoreError> {
        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let rows = tables.entry(target.to_string()).or_default();
        let mut outcome = LoadOutcome::default();
        for record in records {
            let existing = if key_fields.is_empty() {
                None
            } else {
                rows.iter_mut().find(|row| same_key(row, record, key_fields))
            };
            if let Some(row) = existing {
                for (k, v) in record {
                    row.insert(k.clone(), v.clone());
                }
                outcome.updated += 1;
            } else {
                rows.push(record.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }
}
