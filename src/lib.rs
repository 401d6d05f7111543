pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod github;
pub mod logging;
pub mod scoring;
pub mod state;
pub mod utils;
pub mod web;
