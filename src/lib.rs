pub mod api;
pub mod audit;
pub mod config;
pub mod errors;
pub mod export;
pub mod gateway;
pub mod init;
pub mod logging;
pub mod orchestrator;
pub mod stage;
pub mod store;
pub mod workflow;
