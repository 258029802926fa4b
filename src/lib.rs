pub mod config;
pub mod encoder;
pub mod error;
pub mod logger;
pub mod ltb;
pub mod pool;
pub mod publisher;
pub mod record;
pub mod ring;
pub mod serializer;
pub mod transfer;

#[cfg(test)]
pub mod testutil;
