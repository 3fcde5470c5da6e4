// rust/input-core/src/source/null.rs

use super::{SourceKind, SourceProvider};
use crate::codec::RawRecord;
use crate::dataset::{Dataset, ShardSpec};
use crate::error::Result;

/// Endless placeholder records, used when no data is configured.
///
/// Shard parameters are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSource;

impl NullSource {
    pub fn new() -> Self {
        Self
    }
}

impl SourceProvider for NullSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Null
    }

    fn make_source_stream(&self, _shard: ShardSpec) -> Result<Dataset<RawRecord>> {
        Ok(Dataset::repeat_value(RawRecord::Placeholder))
    }

    fn make_predict_stream(&self, _shard: ShardSpec) -> Result<Dataset<RawRecord>> {
        Ok(Dataset::repeat_value(RawRecord::Placeholder))
    }
}
