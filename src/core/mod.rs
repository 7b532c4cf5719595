//! Core primitives shared by every layer.

pub mod clock;
pub mod identity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{IdentityError, PlayerId};
