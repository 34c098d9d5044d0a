//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module  | Commands handled                              |
//! |---------|-----------------------------------------------|
//! | `serve` | `Serve`                                       |
//! | `build` | `Build`, `Watch`, `Resume`, `Show`, `List`    |

pub mod build;
pub mod serve;

pub use build::{WatchOptions, cmd_build, cmd_list, cmd_resume, cmd_show, cmd_watch};
pub use serve::cmd_serve;
