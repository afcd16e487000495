//! Extraction resolver: turns a task's data-source document into a fetch
//! plan and runs it against a [`SourceReader`].
//!
//! SQL mode wins whenever the task has any SQL queries. Interface mode reads
//! each enabled library in priority order, paging by batch size, and tracks
//! how far each incremental watermark may advance.

pub mod incremental;
pub mod sql;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hub_core::enums::IssueSeverity;
use hub_core::errors::CoreError;
use hub_core::governance::{ISSUE_MAPPING_ERROR, Issue};
use hub_core::rules::mapping::FieldMappingRule;
use hub_core::rules::source::{DataSourceConfig, FilterRule, IncrementalConfig, SortField};
use hub_core::value::{Record, record_identifier};

use crate::mapping::map_source_fields;
use crate::source::{BoundQuery, InterfaceQuery, Predicate, SourceReader};

/// Library id recorded as the origin of SQL-mode rows.
pub const SQL_ORIGIN_LIBRARY: &str = "sql";

/// Where one extracted row came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOrigin {
    pub library_id: String,
    pub interface_id: String,
    pub record_id: String,
}

/// The incremental value a row was read at, tied to its fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Position in `Extraction::pending`.
    pub fetch: usize,
    pub value: Value,
}

/// An extracted row with every source row folded into it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedRecord {
    pub origins: Vec<RecordOrigin>,
    pub record: Record,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlFetch {
    pub query: BoundQuery,
    pub max_rows: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceFetch {
    pub library_id: String,
    pub interface_id: String,
    /// Position in `DataSourceConfig::source_libraries`.
    pub library_index: usize,
    /// Position in that library's `interfaces`.
    pub interface_index: usize,
    pub predicates: Vec<Predicate>,
    pub sort: Vec<SortField>,
    pub batch_size: usize,
    pub field_mapping: Vec<FieldMappingRule>,
    pub incremental: Option<IncrementalConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionPlan {
    Sql(Vec<SqlFetch>),
    Interfaces(Vec<InterfaceFetch>),
}

impl ExtractionPlan {
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Sql(_) => "sql",
            Self::Interfaces(_) => "interface",
        }
    }
}

/// Resolve which source mode runs and what each fetch looks like.
///
/// `extra_filters` are appended to every interface fetch; SQL mode ignores
/// them.
///
/// # Errors
///
/// Returns `CoreError::FatalExecution` when neither mode is configured and
/// `CoreError::Validation` for a query that fails read-only validation.
pub fn resolve_plan(
    source: &DataSourceConfig,
    extra_filters: &[FilterRule],
    default_batch_size: usize,
    now: DateTime<Utc>,
) -> Result<ExtractionPlan, CoreError> {
    if source.uses_sql_mode() {
        let fetches = source
            .sql_queries
            .iter()
            .map(|config| {
                Ok(SqlFetch {
                    query: sql::bind(config)?,
                    max_rows: config.max_rows,
                    timeout: Duration::from_secs(config.timeout_seconds),
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        return Ok(ExtractionPlan::Sql(fetches));
    }

    let mut libraries: Vec<_> = source
        .source_libraries
        .iter()
        .enumerate()
        .filter(|(_, lib)| lib.enabled && !lib.interfaces.is_empty())
        .collect();
    libraries.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority));

    let mut fetches = Vec::new();
    for (library_index, library) in libraries {
        for (interface_index, interface) in library.interfaces.iter().enumerate() {
            let incremental = interface.active_incremental();
            let mut predicates: Vec<Predicate> = interface
                .filters
                .iter()
                .chain(extra_filters)
                .cloned()
                .map(Predicate::Filter)
                .collect();
            if let Some(inc) = incremental {
                predicates.extend(incremental::incremental_predicates(inc, now));
            }
            fetches.push(InterfaceFetch {
                library_id: library.library_id.clone(),
                interface_id: interface.interface_id.clone(),
                library_index,
                interface_index,
                predicates,
                sort: incremental.map_or_else(
                    || interface.sort.clone(),
                    |inc| incremental::incremental_sort(inc, &interface.sort),
                ),
                batch_size: interface
                    .batch_size
                    .or_else(|| incremental.map(|inc| inc.batch_size))
                    .unwrap_or(default_batch_size)
                    .max(1),
                field_mapping: interface.field_mapping.clone(),
                incremental: incremental.cloned(),
            });
        }
    }

    if fetches.is_empty() {
        return Err(CoreError::FatalExecution(
            "no data source configured: neither SQL queries nor enabled source libraries".into(),
        ));
    }
    Ok(ExtractionPlan::Interfaces(fetches))
}

/// A watermark that may be persisted once the run succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatermarkAdvance {
    pub library_index: usize,
    pub interface_index: usize,
    pub previous: Option<String>,
    pub value: String,
}

/// An incremental fetch whose watermark is settled once the run knows which
/// rows it keeps.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWatermark {
    pub library_index: usize,
    pub interface_index: usize,
    pub config: IncrementalConfig,
    /// A row cap stopped this fetch before the source ran dry.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<SourcedRecord>,
    /// A row cap cut the result short.
    pub truncated: bool,
    pub pending: Vec<PendingWatermark>,
    /// Rows whose per-interface field mapping failed. They are not in
    /// `records`.
    pub issues: Vec<Issue>,
}

impl Extraction {
    /// Rows read from the sources, including rejected ones.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.records.len() + self.issues.len()
    }
}

/// Watermarks earned by the rows in `kept`.
///
/// Only rows that survive mapping move a watermark, so a rejected row is read
/// again by the next run.
#[must_use]
pub fn settle_watermarks(pending: &[PendingWatermark], kept: &[SourcedRecord]) -> Vec<WatermarkAdvance> {
    pending
        .iter()
        .enumerate()
        .filter_map(|(index, fetch)| {
            let observed: Vec<&Value> = kept
                .iter()
                .filter_map(|r| r.cursor.as_ref())
                .filter(|c| c.fetch == index)
                .map(|c| &c.value)
                .collect();
            let value = incremental::advance_watermark(&fetch.config, &observed, fetch.truncated)?;
            Some(WatermarkAdvance {
                library_index: fetch.library_index,
                interface_index: fetch.interface_index,
                previous: incremental::current_watermark(&fetch.config).map(str::to_string),
                value,
            })
        })
        .collect()
}

/// Write advanced watermarks back into the data-source document.
pub fn apply_watermarks(source: &mut DataSourceConfig, advances: &[WatermarkAdvance]) -> usize {
    let mut applied = 0;
    for advance in advances {
        let incremental = source
            .source_libraries
            .get_mut(advance.library_index)
            .and_then(|lib| lib.interfaces.get_mut(advance.interface_index))
            .and_then(|iface| iface.incremental.as_mut());
        if let Some(inc) = incremental {
            inc.last_sync_value = Some(advance.value.clone());
            applied += 1;
        }
    }
    applied
}

/// Runs an [`ExtractionPlan`].
pub struct Extractor<'a> {
    reader: &'a dyn SourceReader,
    cancel: CancellationToken,
    execution_id: String,
    max_records: Option<usize>,
}

impl<'a> Extractor<'a> {
    #[must_use]
    pub fn new(reader: &'a dyn SourceReader, execution_id: impl Into<String>) -> Self {
        Self {
            reader,
            cancel: CancellationToken::new(),
            execution_id: execution_id.into(),
            max_records: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn with_max_records(mut self, max_records: Option<usize>) -> Self {
        self.max_records = max_records;
        self
    }

    fn check_cancelled(&self) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled {
                execution_id: self.execution_id.clone(),
            });
        }
        Ok(())
    }

    fn remaining(&self, extraction: &Extraction) -> Option<usize> {
        self.max_records
            .map(|max| max.saturating_sub(extraction.source_count()))
    }

    /// # Errors
    ///
    /// Propagates reader errors, returns `CoreError::FatalExecution` when a
    /// query times out and `CoreError::Cancelled` when the run is stopped.
    pub async fn run(&self, plan: &ExtractionPlan) -> Result<Extraction, CoreError> {
        let mut extraction = Extraction::default();
        match plan {
            ExtractionPlan::Sql(fetches) => {
                for (i, fetch) in fetches.iter().enumerate() {
                    self.check_cancelled()?;
                    self.run_sql(i, fetch, &mut extraction).await?;
                }
            }
            ExtractionPlan::Interfaces(fetches) => {
                for fetch in fetches {
                    self.check_cancelled()?;
                    self.run_interface(fetch, &mut extraction).await?;
                }
            }
        }
        Ok(extraction)
    }

    async fn run_sql(
        &self,
        index: usize,
        fetch: &SqlFetch,
        extraction: &mut Extraction,
    ) -> Result<(), CoreError> {
        let cap = self
            .remaining(extraction)
            .map_or(fetch.max_rows, |left| left.min(fetch.max_rows));
        let rows = tokio::time::timeout(
            fetch.timeout,
            self.reader.query_sql(&fetch.query, fetch.max_rows.saturating_add(1)),
        )
        .await
        .map_err(|_| {
            CoreError::FatalExecution(format!(
                "query {index} timed out after {}s",
                fetch.timeout.as_secs()
            ))
        })??;

        if rows.len() > fetch.max_rows {
            warn!(
                query = index,
                max_rows = fetch.max_rows,
                "query returned more rows than the cap; result truncated"
            );
            extraction.truncated = true;
        } else if rows.len() > cap {
            extraction.truncated = true;
        }
        let interface_id = format!("query_{index}");
        let base = extraction.records.len();
        extraction
            .records
            .extend(rows.into_iter().take(cap).enumerate().map(|(i, record)| {
                SourcedRecord {
                    origins: vec![RecordOrigin {
                        library_id: SQL_ORIGIN_LIBRARY.into(),
                        interface_id: interface_id.clone(),
                        record_id: record_identifier(&record, base + i),
                    }],
                    record,
                    cursor: None,
                }
            }));
        debug!(query = index, records = extraction.records.len() - base, "sql query extracted");
        Ok(())
    }

    async fn run_interface(
        &self,
        fetch: &InterfaceFetch,
        extraction: &mut Extraction,
    ) -> Result<(), CoreError> {
        let pending = fetch.incremental.as_ref().map(|inc| {
            extraction.pending.push(PendingWatermark {
                library_index: fetch.library_index,
                interface_index: fetch.interface_index,
                config: inc.clone(),
                truncated: false,
            });
            extraction.pending.len() - 1
        });
        let mut read = 0;
        let mut offset = 0;
        loop {
            self.check_cancelled()?;
            let limit = match self.remaining(extraction) {
                Some(0) => {
                    extraction.truncated = true;
                    if let Some(index) = pending {
                        extraction.pending[index].truncated = true;
                    }
                    break;
                }
                Some(left) => left.min(fetch.batch_size),
                None => fetch.batch_size,
            };
            let page = self
                .reader
                .fetch_interface(&InterfaceQuery {
                    library_id: fetch.library_id.clone(),
                    interface_id: fetch.interface_id.clone(),
                    predicates: fetch.predicates.clone(),
                    sort: fetch.sort.clone(),
                    limit,
                    offset,
                })
                .await?;
            let fetched = page.len();
            for row in page {
                let record_id = record_identifier(&row, read);
                read += 1;
                match map_source_fields(&fetch.field_mapping, &row) {
                    Ok(record) => extraction.records.push(SourcedRecord {
                        origins: vec![RecordOrigin {
                            library_id: fetch.library_id.clone(),
                            interface_id: fetch.interface_id.clone(),
                            record_id,
                        }],
                        record,
                        cursor: pending.zip(fetch.incremental.as_ref()).and_then(|(index, inc)| {
                            row.get(&inc.field)
                                .filter(|v| !v.is_null())
                                .map(|v| Cursor {
                                    fetch: index,
                                    value: v.clone(),
                                })
                        }),
                    }),
                    Err(failure) => {
                        warn!(
                            interface = %fetch.interface_id,
                            record_id = %record_id,
                            "source field mapping failed: {failure}"
                        );
                        extraction.issues.push(
                            Issue::new(
                                ISSUE_MAPPING_ERROR,
                                IssueSeverity::Error,
                                record_id,
                                failure.message.clone(),
                            )
                            .with_field(failure.field),
                        );
                    }
                }
            }
            offset += fetched;
            if fetched < limit || fetched == 0 {
                break;
            }
        }

        debug!(
            library = %fetch.library_id,
            interface = %fetch.interface_id,
            records = read,
            "interface extracted"
        );
        Ok(())
    }
}
