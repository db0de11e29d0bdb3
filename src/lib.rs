// src/lib.rs
pub mod config;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod lookup;
pub mod search;
pub mod table;
