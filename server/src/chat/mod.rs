pub mod events;
pub mod filter;
pub mod service;
pub mod state;
