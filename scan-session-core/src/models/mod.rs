pub mod artifact;
pub mod config;
pub mod device;
pub mod error;
pub mod page;
pub mod progress;
pub mod state;
