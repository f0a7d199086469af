pub mod config;
pub mod identity;
pub mod types;

pub use config::TandemConfig;
pub use identity::Identity;
pub use types::*;
