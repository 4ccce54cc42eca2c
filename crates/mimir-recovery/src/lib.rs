pub mod classifier;
pub mod config;
pub mod keys;
pub mod manager;
pub mod pending;
pub mod pool;
pub mod request;
pub mod reset;

pub use config::RecoveryConfig;
pub use manager::DisasterRecoveryManager;
pub use request::{DisasterRecoveryRequest, ManualGroupUpdateRequest};
pub use reset::Assignments;
