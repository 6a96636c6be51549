pub mod auditor;
pub mod columnar;
pub mod data_loader;
pub mod error;
pub mod market_rule;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod reconciler;
pub mod row_export;
pub mod sinks;
pub mod table_store;

pub use auditor::{audit, GapRange, GapReport};
pub use data_loader::{DataLoader, StoreSnapshot};
pub use error::{LedgerError, SinkError, SinkFailure};
pub use market_rule::{MarketRule, SuffixRule};
pub use models::{HistoricalDataset, IngestBatch, Market, PriceRecord};
pub use pipeline::{Pipeline, PipelineConfig, RunReport};
pub use reconciler::{merge, reconcile, MergeStats};
pub use sinks::{MultiSinkWriter, Sink, SinkConfig, SinkKind};
