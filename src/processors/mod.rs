pub mod node;
pub mod scheduler;
pub mod socket;

pub use node::{NodeMemoryRecords, ProcessableData};
pub use scheduler::{
    build_output_process_model, controllers_per_socket, run_scheduler, RunStats, SchedulerOptions,
};
pub use socket::{BandwidthSample, SocketMemoryRecords};
