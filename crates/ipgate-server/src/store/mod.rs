pub mod db;
pub mod model;

pub use db::{Store, StoreError};
pub use model::{AllowEntry, AllowlistDocument, FixedIps};
