pub mod clarify;
pub mod error;
pub mod gate;
pub mod preview;
