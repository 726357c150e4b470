pub mod csv;
pub mod summary;
pub mod writer;

pub use csv::{save_metrics_to_csv, MetricCsvRow};
pub use summary::print_final_summary;
pub use writer::{write_metric_event, PendingOutputBuffer};
