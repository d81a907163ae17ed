pub mod alert;
pub mod consecutive;
pub mod cooldown;
pub mod detector;
pub mod outcome;
pub mod preliminary;
pub mod priority;
pub mod run_counter;
pub mod volume;

pub use alert::{AlertPayload, AlertRecord};
pub use detector::{Capabilities, SignalDetector};
pub use outcome::StepOutcome;
