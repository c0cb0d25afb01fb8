pub mod app;
pub mod config;
pub mod dispatch;
pub mod plugins;
pub mod preflight;
pub mod queue;
pub mod remote;
pub mod runtime;
pub mod shared;
pub mod task;
