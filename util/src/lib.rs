mod error;
mod host_addr;
mod targets;

pub use error::Error;
pub use host_addr::{
    enumerate, enumerate_for_interface, sources_for, InterfaceAddress, Inventory, Link,
};
pub use targets::{load_targets, parse_targets, TargetSet};
