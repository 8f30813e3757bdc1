pub mod auth;
pub mod clarify;
pub mod confirm;
pub mod job;
pub mod patch;
pub mod preview;
pub mod status;
