#![doc = include_str!("RUSTDOC.md")]

pub mod app;
pub mod auth;
pub mod logger;
pub mod platform;
pub mod realtime;
pub mod store;
pub mod sync;
pub mod util;

#[cfg(test)]
pub mod test_support;
