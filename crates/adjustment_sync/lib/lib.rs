pub mod adjustment_store;
pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
pub mod notifier;
pub mod sage_client;
pub mod server;
pub mod state;
pub mod sync_service;
