mod config;
mod memory_event;
mod memory_record;
mod metrics;
mod pmu_type;

pub use config::RunConfig;
pub use memory_event::{Direction, MemoryEvent};
pub use memory_record::MemoryRecord;
pub use metrics::{AggregationKey, MemoryMetrics, MetricSums, METRIC_LABELS};
pub use pmu_type::PmuType;
