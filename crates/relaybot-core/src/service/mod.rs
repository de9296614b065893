pub mod sqlite_usage;
pub mod usage;

#[cfg(feature = "http-api")]
pub mod http;
