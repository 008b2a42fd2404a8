pub mod checksum;
pub mod chunked;
pub mod fragment;
pub mod group;
pub mod http;
pub mod item;
pub mod resume;
pub mod scheduler;
pub mod status;
pub mod telemetry;
pub mod worker;

pub use chunked::{ChunkedDownloader, DownloaderConfig, DownloaderContext, WorkerInfo};
pub use fragment::{Fragment, FragmentAllocator, FragmentSnapshot, FragmentState, DEFAULT_CHUNK_SIZE};
pub use group::{Group, GroupProgress};
pub use item::{DownloadLink, Item};
pub use resume::ResumeState;
pub use scheduler::{DownloadScheduler, SchedulerConfig};
pub use status::{DownloadStatus, GroupState};
pub use telemetry::AggregateStats;
pub use worker::{Worker, WorkerEvent, WorkerState};
