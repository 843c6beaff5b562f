pub mod btle;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod radio;
pub mod scanner;
pub mod service;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;
