pub mod broker;
pub mod config;
pub mod normalize;
pub mod redis;
pub mod submission;
pub mod types;
