// rust/input-core/src/source/scan.rs

//! Remote column-store scan source.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{SourceKind, SourceProvider};
use crate::codec::RawRecord;
use crate::dataset::{Cardinality, Dataset, Elements, ShardSpec};
use crate::error::{InputError, Result};

/// Which rows and column a scan reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSelection {
    pub project: String,
    pub instance: String,
    pub table: String,
    /// Row-key prefix.
    pub prefix: String,
    pub column_family: String,
    pub column_qualifier: String,
}

impl ScanSelection {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("project", &self.project),
            ("instance", &self.instance),
            ("table", &self.table),
            ("prefix", &self.prefix),
            ("column_family", &self.column_family),
            ("column_qualifier", &self.column_qualifier),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(InputError::config(format!(
                    "source.{name} must not be empty for a bigtable source"
                )));
            }
        }
        Ok(())
    }
}

/// One row returned by a scan: its key and the selected column's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRow {
    pub row_key: Bytes,
    pub value: Bytes,
}

pub type ScanRows = Box<dyn Iterator<Item = Result<ScanRow>> + Send>;

/// Client for a column store that supports prefix scans.
pub trait ScanClient: Send + Sync {
    /// Scans rows whose key starts with `selection.prefix`, in key order,
    /// returning the `(column_family, column_qualifier)` cell of each row.
    /// Rows without that cell are skipped.
    fn scan_prefix(&self, selection: &ScanSelection) -> Result<ScanRows>;
}

type Cells = BTreeMap<(String, String), Bytes>;

/// In-memory scan client.
#[derive(Default)]
pub struct InMemoryScanClient {
    tables: RwLock<BTreeMap<String, BTreeMap<Bytes, Cells>>>,
}

impl fmt::Debug for InMemoryScanClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryScanClient").finish_non_exhaustive()
    }
}

impl InMemoryScanClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one cell.
    pub fn put(
        &self,
        table: &str,
        row_key: impl Into<Bytes>,
        column_family: &str,
        column_qualifier: &str,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| InputError::source("bigtable", "table lock poisoned"))?;
        tables
            .entry(table.to_string())
            .or_default()
            .entry(row_key.into())
            .or_default()
            .insert(
                (column_family.to_string(), column_qualifier.to_string()),
                value.into(),
            );
        Ok(())
    }
}

impl ScanClient for InMemoryScanClient {
    fn scan_prefix(&self, selection: &ScanSelection) -> Result<ScanRows> {
        let tables = self
            .tables
            .read()
            .map_err(|_| InputError::source("bigtable", "table lock poisoned"))?;
        let rows = tables.get(&selection.table).ok_or_else(|| {
            InputError::source("bigtable", format!("table '{}' not found", selection.table))
        })?;

        let column = (
            selection.column_family.clone(),
            selection.column_qualifier.clone(),
        );
        let prefix = selection.prefix.as_bytes();
        let matched: Vec<Result<ScanRow>> = rows
            .range(Bytes::copy_from_slice(prefix)..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, cells)| {
                cells.get(&column).map(|value| {
                    Ok(ScanRow {
                        row_key: key.clone(),
                        value: value.clone(),
                    })
                })
            })
            .collect();

        Ok(Box::new(matched.into_iter()))
    }
}

/// Reads records from a prefix scan over a remote table.
pub struct RemoteScanSource {
    client: Arc<dyn ScanClient>,
    selection: ScanSelection,
    is_training: bool,
}

impl fmt::Debug for RemoteScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteScanSource")
            .field("selection", &self.selection)
            .field("is_training", &self.is_training)
            .finish_non_exhaustive()
    }
}

impl RemoteScanSource {
    pub fn new(client: Arc<dyn ScanClient>, selection: ScanSelection, is_training: bool) -> Self {
        Self {
            client,
            selection,
            is_training,
        }
    }

    pub fn selection(&self) -> &ScanSelection {
        &self.selection
    }

    /// One pass over the rows owned by `shard`.
    fn scan(&self, shard: ShardSpec) -> Result<Dataset<RawRecord>> {
        shard.validate()?;
        let client = Arc::clone(&self.client);
        let selection = self.selection.clone();

        Ok(Dataset::from_fn(Cardinality::Finite, move || {
            let rows = client.scan_prefix(&selection)?;
            let records = rows.filter_map(move |row| match row {
                Ok(row) if shard.owns_key(&row.row_key) => Some(Ok(RawRecord::Data(row.value))),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            });
            Ok(Box::new(records) as Elements<RawRecord>)
        }))
    }
}

impl SourceProvider for RemoteScanSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Bigtable
    }

    fn make_source_stream(&self, shard: ShardSpec) -> Result<Dataset<RawRecord>> {
        let rows = self.scan(shard)?;
        tracing::debug!(
            table = %self.selection.table,
            prefix = %self.selection.prefix,
            shard = shard.index,
            total = shard.total,
            "opened scan for shard"
        );
        if self.is_training {
            Ok(rows.repeat())
        } else {
            Ok(rows)
        }
    }

    fn make_predict_stream(&self, shard: ShardSpec) -> Result<Dataset<RawRecord>> {
        self.scan(shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn selection() -> ScanSelection {
        ScanSelection {
            project: "proj".to_string(),
            instance: "inst".to_string(),
            table: "prices".to_string(),
            prefix: "train_".to_string(),
            column_family: "tfexample".to_string(),
            column_qualifier: "example".to_string(),
        }
    }

    fn populated_client(rows: usize) -> Arc<InMemoryScanClient> {
        let client = InMemoryScanClient::new();
        for i in 0..rows {
            client
                .put(
                    "prices",
                    format!("train_{i:05}"),
                    "tfexample",
                    "example",
                    format!("{i}"),
                )
                .unwrap();
        }
        client
            .put("prices", "validation_00000", "tfexample", "example", "v")
            .unwrap();
        client
            .put("prices", "train_99999", "other", "example", "skipped")
            .unwrap();
        Arc::new(client)
    }

    fn values(ds: &Dataset<RawRecord>) -> Vec<String> {
        ds.collect_vec()
            .unwrap()
            .into_iter()
            .map(|r| match r {
                RawRecord::Data(b) => String::from_utf8(b.to_vec()).unwrap(),
                RawRecord::Placeholder => panic!("unexpected placeholder"),
            })
            .collect()
    }

    #[test]
    fn test_selection_validate() {
        assert!(selection().validate().is_ok());

        let mut s = selection();
        s.column_qualifier = " ".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_in_memory_scan_prefix_and_column() {
        let client = populated_client(3);
        let rows: Vec<ScanRow> = client
            .scan_prefix(&selection())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        let keys: Vec<&[u8]> = rows.iter().map(|r| &r.row_key[..]).collect();
        assert_eq!(
            keys,
            vec![&b"train_00000"[..], &b"train_00001"[..], &b"train_00002"[..]]
        );
    }

    #[test]
    fn test_missing_table_is_source_error() {
        let client = InMemoryScanClient::new();
        let err = client.scan_prefix(&selection()).err().unwrap();
        assert!(matches!(err, InputError::Source { .. }));
    }

    #[test]
    fn test_shards_partition_rows() {
        let source = RemoteScanSource::new(populated_client(100), selection(), false);

        let mut all = HashSet::new();
        let mut total = 0;
        for index in 0..3 {
            let ds = source
                .make_source_stream(ShardSpec::new(index, 3).unwrap())
                .unwrap();
            let shard_values = values(&ds);
            total += shard_values.len();
            all.extend(shard_values);
        }

        assert_eq!(total, 100);
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn test_shard_rows_are_stable() {
        let source = RemoteScanSource::new(populated_client(50), selection(), false);
        let shard = ShardSpec::new(1, 4).unwrap();

        let a = values(&source.make_source_stream(shard).unwrap());
        let b = values(&source.make_source_stream(shard).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_training_repeats() {
        let source = RemoteScanSource::new(populated_client(4), selection(), true);
        let ds = source.make_source_stream(ShardSpec::single()).unwrap();
        assert_eq!(ds.cardinality(), Cardinality::Infinite);
        assert_eq!(ds.take(10).collect_vec().unwrap().len(), 10);

        let predict = source.make_predict_stream(ShardSpec::single()).unwrap();
        assert_eq!(predict.collect_vec().unwrap().len(), 4);
    }

    #[test]
    fn test_invalid_shard() {
        let source = RemoteScanSource::new(populated_client(4), selection(), false);
        let result = source.make_source_stream(ShardSpec { index: 2, total: 2 });
        assert!(matches!(result, Err(InputError::InvalidShard { .. })));
    }
}
