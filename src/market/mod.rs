pub mod chain;
pub mod client;
pub mod history;
pub mod types;
