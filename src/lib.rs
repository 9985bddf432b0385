pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod submit;
pub mod util;
pub mod warehouse;
