pub mod clock;
pub mod config;
pub mod controller;
pub mod errors;
pub mod logging;
pub mod oracle;
pub mod patch;
pub mod pipeline;
pub mod platform;
pub mod publish;
pub mod repo_map;
pub mod review;
pub mod task;
pub mod util;
pub mod validate;
pub mod workspace;
