// Marketplace client - Library root

pub mod activity;
pub mod auth;
pub mod authenticator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod http_client;
pub mod request;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;
