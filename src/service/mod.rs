//! HTTP services

pub mod caller;
pub mod downstream;
mod server;

pub use server::serve;
