pub mod audio;
pub mod config;
pub mod error;
pub mod policy;
pub mod route;
pub mod state;
