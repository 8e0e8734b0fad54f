pub mod payments;
pub mod requests;
pub mod rides;
