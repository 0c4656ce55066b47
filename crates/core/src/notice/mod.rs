// crates/core/src/notice/mod.rs
//! Real-time progress notifications.
//!
//! Work loops advance a [`Progress`] (directly or through [`ProxyReader`] /
//! [`ProxyWriter`]), a [`Noticer`] snapshots it into a [`Message`], and the
//! [`Bus`] delivers that message to one connected browser client of the
//! acting user.

pub mod bus;
pub mod message;
pub mod noticer;
pub mod progress;
pub mod proxy;

pub use bus::{Bus, ClientStream, Hook, OnlineUserInfo};
pub use message::{DisplayMode, Message};
pub use noticer::{NoticeAndProgress, Noticer, NoticerConfig};
pub use progress::{ExitCheck, PercentFeed, Progress, ProgressInfo, TimeoutCheck, TOTAL_UNSET};
pub use proxy::{ProxyReader, ProxyWriter};
