pub mod db;
pub mod models;
pub mod ratio_store;
pub mod results;

pub use rusqlite;
