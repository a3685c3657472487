pub mod delayed;
pub mod dispatcher;
pub mod timer;
