#[macro_use]
extern crate tracing;

pub mod binding;
pub mod bound_client;
pub mod config;
pub mod run_loop;

pub use binding::{AddressBind, BindMode, Binding, DeviceBind};
pub use bound_client::{BoundClient, ClientConfig, RequestError, RequestOutcome, Sender};
pub use config::Args;
pub use run_loop::Dispatcher;
