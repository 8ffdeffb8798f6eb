pub mod config;
pub mod deploy;
pub mod develop;
pub mod errors;
pub mod exec;
pub mod request;
pub mod sandbox;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod verify;
