pub mod models;
pub mod pii;

pub use models::driver::{Driver, DriverStatus, NewDriver};
pub use models::ledger::{
    Account, AccountRef, AccountType, EntryKind, EntryStatus, LedgerEntry, NewLedgerEntry,
};
pub use models::order::{CommissionSplit, NewTransferOrder, OrderStatus, TransferOrder};
pub use models::ride::{
    Booking, BookingStatus, NewRideOffer, Passenger, RideFilter, RideOffer, RideOverride,
    RideOwner, RideStatus, UnavailableReason,
};
pub use models::{ParseEnumError, MAX_AMOUNT};
pub use pii::Masked;
