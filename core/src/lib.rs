//! Bootplug core.
//!
//! Object plumbing for network-boot firmware.
//!
//! # Architecture
//! - `refcnt` / `interface` - Reference counting and plug/unplug/close
//! - `xfer` - Data-transfer interface, filters, metadata
//! - `job` - Job-control interface (done, kill, progress)
//! - `open` - Opening locations by URI scheme or socket type
//! - `process` - Cooperative round-robin scheduler
//! - `retry` - Retry timers with exponential backoff
//! - `downloader` / `monojob` - Fetching an image in the foreground
//! - `context` - Scheduler, timers and openers for one run
//!
//! Everything runs on a single thread; objects are shared through `Rc` and
//! mutated through `Cell`/`RefCell`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod context;
pub mod downloader;
pub mod error;
pub mod heap;
pub mod interface;
pub mod iobuf;
pub mod job;
pub mod logger;
pub mod monojob;
pub mod open;
pub mod process;
pub mod refcnt;
pub mod retry;
pub mod serial;
pub mod time;
pub mod uri;
pub mod xfer;
pub mod xferbuf;

// Re-exports
pub use config::{Config, RetryConfig, Timeouts};
pub use context::Context;
pub use downloader::Downloader;
pub use error::{Error, Result, Status};
pub use interface::{insert, plug_plug, restart_all, shutdown_all, Interface, Shutdown};
pub use iobuf::IoBuffer;
pub use job::{Job, NullJob, Progress};
pub use monojob::{fetch, Console, Monojob, NullConsole};
pub use open::{Location, Openers, SocketKind, SocketOpener, UriOpener};
pub use process::{FnProcess, Process, ProcessLink, Scheduler};
pub use refcnt::Refcnt;
pub use retry::{RetryTimer, Timers, BACKOFF_LIMIT};
pub use time::{Clock, ManualClock, TickRate, TscClock};
pub use uri::Uri;
pub use xfer::{insert_filter, Filter, Metadata, NetDevId, NullXfer, Xfer, XferFlags};
pub use xferbuf::XferBuffer;
