pub mod driver;
pub mod ride;

pub use driver::{DriverEligibility, OverdueDriver};
pub use ride::{MatchAttempt, RideStatus};
