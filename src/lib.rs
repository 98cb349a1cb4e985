pub mod compactor;
pub mod config;
pub mod lab;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod seed;
pub mod store;
pub mod wal;
pub mod window;
