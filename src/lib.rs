pub mod audit;
pub mod binder;
pub mod cli;
pub mod config;
pub mod container;
pub mod errors;
pub mod extractor;
pub mod gate;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod registry;
