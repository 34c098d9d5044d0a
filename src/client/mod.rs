//! Client side: talks to the build server and turns snapshots into UI state.

pub mod api_client;
pub mod cache;
pub mod poll;
pub mod view_model;

pub use api_client::{BuildClient, JobSource};
pub use cache::{BuildCache, CachedBuild};
pub use poll::{PollConfig, PollController};
pub use view_model::BuildViewModel;
