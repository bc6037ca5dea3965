pub mod cancellations;
pub mod finalize;
pub mod reservations;
pub mod waitlists;

pub use cancellations::CancellationService;
pub use finalize::FinalizeService;
pub use reservations::{ReservationOutcome, ReservationService};
pub use waitlists::WaitlistService;
