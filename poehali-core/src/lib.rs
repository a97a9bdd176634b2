pub mod clock;
pub mod error;
pub mod repository;
pub mod timeout;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DriverError, LedgerError, OrderError, RideError, StoreError};
pub use timeout::bounded;
