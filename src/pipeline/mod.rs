//! Server side of the app build pipeline.
//!
//! - `db`, `store`: SQLite-backed job records and their step logs
//! - `generation`, `deploy`: clients for the external capabilities
//! - `stages`: runs one stage against those clients
//! - `runner`: phase state machine and the supervised background worker
//! - `launcher`: request validation and job creation
//! - `api`, `server`: HTTP surface

pub mod api;
pub mod db;
pub mod deploy;
pub mod generation;
pub mod launcher;
pub mod runner;
pub mod server;
pub mod stages;
pub mod store;

pub use db::{BuildDb, DbHandle, JobUpdate};
pub use launcher::{JobLauncher, derive_app_name};
pub use runner::{Phase, PipelineRunner, ResumeOutcome, RunRequest};
pub use server::{ServerConfig, build_router, start_server};
pub use stages::{Stage, StageExecutor, StageTimeouts};
pub use store::{JobStore, TerminalOutcome};
