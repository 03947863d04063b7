//! Motion signal primitives: vectors, sample history and the jerk detector.

pub mod history;
pub mod jerk;
pub mod vector;

pub use history::{HistoryBuffer, HistoryError};
pub use jerk::{JerkDetector, JerkSettings};
pub use vector::Vector3;
