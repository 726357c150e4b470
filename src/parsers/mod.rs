pub mod pcf;
pub mod prv;
pub mod row;

pub use pcf::{extract_memory_event_types, write_output_pcf};
pub use prv::{parse_record_line, ProcessModel, RecordKind, RecordLine, ResourceModel, TraceHeader};
pub use row::{write_output_row, RowFile};
