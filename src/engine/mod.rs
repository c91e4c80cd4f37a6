// Encoding engine - independent of the command line front end

pub mod backend;
pub mod core;
pub mod hardware;
pub mod simulate;

pub use self::core::*;
