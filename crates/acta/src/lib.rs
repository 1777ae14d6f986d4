pub mod daemon;
pub mod db;
pub mod error;
pub mod filter;
pub mod id;
pub mod reconcile;
pub mod types;
