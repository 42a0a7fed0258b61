pub mod catalog;
pub mod config;
pub mod engine;
pub mod remote;
pub mod session;
pub mod store;
