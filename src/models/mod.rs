pub mod finding;
pub mod integration;
pub mod repo;
pub mod scan;
pub mod settings;
