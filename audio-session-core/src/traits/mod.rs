pub mod capture_device;
pub mod delegate;
pub mod output_device;
pub mod platform;
pub mod session_hardware;
pub mod speech;
