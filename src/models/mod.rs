mod session;

pub use session::{ParkingSession, SessionStatus};
