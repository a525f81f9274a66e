pub mod ad_spy;
pub mod ad_spy_scheduler;
pub mod ads_platform;
pub mod claude_api;
pub mod config;
pub mod iteration_generator;
pub mod ranking;
pub mod run_timeout;
pub mod script_source;
