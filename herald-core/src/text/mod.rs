//! Text normalization and command routing.

pub mod normalize;
pub mod router;

pub use normalize::normalize;
pub use router::{classify_wake, CommandRouter, RouteMatch, WakeCheck};
