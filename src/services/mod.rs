pub mod github;
pub mod orchestrator;
pub mod store;
pub mod tasks;
pub mod trufflehog;
