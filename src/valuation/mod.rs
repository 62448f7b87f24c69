pub mod calculator;
pub mod engine;
