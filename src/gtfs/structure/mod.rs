pub mod realtime;
pub mod serde_helpers;
