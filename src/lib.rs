//! Query mail agent — turns query emails into backend runs and replies with the results.

pub mod backend;
pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
