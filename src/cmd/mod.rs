//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `run`           | `Fix`, `Revise`, `Review`                          |
//! | `map`           | `Map`                                              |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod map;
pub mod run;

pub use config::cmd_config;
pub use map::cmd_map;
pub use run::{cmd_fix, cmd_review, cmd_revise};
