// Append-only snapshot store backed by SQLite

pub mod sqlite;

pub use sqlite::*;
