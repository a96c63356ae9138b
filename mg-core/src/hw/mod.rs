//! Hardware collaborators
//!
//! GPIO output for the relay bank, frame capture and digit recognition.

mod capture;
mod control;
mod gateway;
mod reader;

pub use capture::{CommandFrameSource, Frame, FrameSource};
pub use control::{Actuator, Level, SysfsGpio};
pub use gateway::ActuationGateway;
pub use reader::{DigitReader, TesseractReader};

#[cfg(test)]
pub use capture::MockFrameSource;
#[cfg(test)]
pub use control::MockActuator;
#[cfg(test)]
pub use reader::MockDigitReader;
