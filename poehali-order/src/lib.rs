pub mod claim;
pub mod drivers;

pub use claim::{ClaimEngine, ClaimRules};
pub use drivers::{DriverRules, DriverService, MAX_COMMISSION_RATE_BP};
