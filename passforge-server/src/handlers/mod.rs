pub mod log;
pub mod passes;
pub mod registrations;
