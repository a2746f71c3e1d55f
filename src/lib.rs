pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notifier;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod timefmt;
pub mod wal;
