pub mod chat;
pub mod config;
pub mod presence;
pub mod publisher;
pub mod store;
pub mod web;
