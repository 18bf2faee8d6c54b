pub mod realtime;
pub mod structure;
