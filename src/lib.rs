pub mod cluster;
pub mod config;
pub mod connection;
pub mod context;
pub mod diagnostics;
pub mod exclusions;
pub mod health;
pub mod management;
pub mod models;
pub mod report;
pub mod reporter;
pub mod schemas;
pub mod settings;
