// crates/core/src/lib.rs
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod notice;

pub use config::NoticeConfig;
pub use context::CoordinationContext;
pub use error::{JobError, NoticeError};
pub use jobs::{Group, JobHandle, JobId, JobSnapshot, Registry};
pub use notice::{
    Bus, ClientStream, DisplayMode, ExitCheck, Message, NoticeAndProgress, Noticer,
    NoticerConfig, OnlineUserInfo, Progress, ProgressInfo, ProxyReader, ProxyWriter,
    TimeoutCheck,
};
