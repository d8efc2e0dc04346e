pub mod timer;

pub use timer::{FrameStats, HighPrecisionTimer, ManualTimer, Timer, iso_timestamp, millis, nanos};
