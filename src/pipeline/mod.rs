pub(crate) mod config;
pub(crate) mod format;
pub(crate) mod orchestrator;
pub(crate) mod platform;
pub(crate) mod state;
