//! Data types, registry, persistence and validation

mod persistence;
mod registry;
mod types;
mod validation;

pub use persistence::{
    write_atomic, JsonRegistryStore, JsonlReadingStore, MemoryReadingStore,
    MemoryRegistryStore, ReadingStore, RegistryStore,
};
pub use registry::Registry;
pub use types::{ActuationReport, Group, GroupId, Pin, Reading, Relay, RelayId};
pub use validation::{validate_name, validate_pin, validate_reading_value};
