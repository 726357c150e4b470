pub mod curves;
pub mod models;
pub mod output;
pub mod parsers;
pub mod processors;
pub mod utils;

// 주요 기능 재내보내기(re-exporting)
pub use curves::{CpuMemoryDb, CurveLookup, Curves};
pub use models::{MemoryEvent, MemoryMetrics, MemoryRecord, PmuType, RunConfig};
pub use parsers::{extract_memory_event_types, RowFile, TraceHeader};
pub use processors::{run_scheduler, NodeMemoryRecords, SchedulerOptions};
