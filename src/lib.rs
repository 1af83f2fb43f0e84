pub mod analysis;
pub mod config;
pub mod dashboard;
pub mod dispatcher;
pub mod error;
pub mod frame_source;
pub mod radar;
pub mod relay;
pub mod session;
pub mod speech;
