pub mod booking;
pub mod event;
pub mod waitlist;

pub use booking::{Booking, BookingStatus};
pub use event::{Event, EventStatus};
pub use waitlist::WaitlistEntry;
