//! Database implementations.

mod postgres;

pub use postgres::{PostgresClient, PostgresConfig};
