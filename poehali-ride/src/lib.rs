pub mod booking;
pub mod inventory;
pub mod token;

pub use booking::{BookingReceipt, BookingRequest, BookingService, OfferListing};
pub use inventory::{Actor, InventoryRules, RideInventory};
pub use token::CancelToken;
