//! How a client's sockets are pinned to a local source.
//!
//! Both strategies configure the client's connector, so every connection the
//! client opens is bound, including those opened to follow a redirect.

use std::fmt;
use std::io;
use std::net::IpAddr;

use clap::ValueEnum;
use reqwest::ClientBuilder;
use util::InterfaceAddress;

use crate::bound_client::RequestError;

pub trait Binding: fmt::Debug + Send + Sync {
    /// Configure `builder` so all of its connections originate from `source`.
    fn apply(
        &self,
        builder: ClientBuilder,
        source: &InterfaceAddress,
    ) -> Result<ClientBuilder, RequestError>;

    /// Check up front that this binding can be used for `interface`.
    fn probe(&self, interface: &str) -> Result<(), RequestError>;

    /// Whether sockets are pinned to a device, which is the only privileged step.
    fn is_device(&self) -> bool {
        false
    }
}

/// Bind the socket's local endpoint to `(source, 0)` and let routing pick the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressBind;

impl Binding for AddressBind {
    fn apply(
        &self,
        builder: ClientBuilder,
        source: &InterfaceAddress,
    ) -> Result<ClientBuilder, RequestError> {
        Ok(builder.local_address(IpAddr::V4(source.address)))
    }

    fn probe(&self, _interface: &str) -> Result<(), RequestError> {
        Ok(())
    }
}

/// `SO_BINDTODEVICE` on the owning interface, plus the address bind.
///
/// Needs `CAP_NET_RAW`. Without it requests fail with `InsufficientPrivilege`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceBind;

impl Binding for DeviceBind {
    fn is_device(&self) -> bool {
        true
    }

    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    fn apply(
        &self,
        builder: ClientBuilder,
        source: &InterfaceAddress,
    ) -> Result<ClientBuilder, RequestError> {
        Ok(builder
            .interface(&source.interface_name)
            .local_address(IpAddr::V4(source.address)))
    }

    #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
    fn apply(
        &self,
        _builder: ClientBuilder,
        _source: &InterfaceAddress,
    ) -> Result<ClientBuilder, RequestError> {
        Err(RequestError::DeviceBindUnsupported)
    }

    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    fn probe(&self, interface: &str) -> Result<(), RequestError> {
        use socket2::{Domain, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)
            .map_err(|e| RequestError::ConnectFailed(format!("probe socket: {e}")))?;

        socket
            .bind_device(Some(interface.as_bytes()))
            .map_err(|e| bind_device_error(interface, e))
    }

    #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
    fn probe(&self, _interface: &str) -> Result<(), RequestError> {
        Err(RequestError::DeviceBindUnsupported)
    }
}

pub(crate) fn bind_device_error(interface: &str, err: io::Error) -> RequestError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => RequestError::InsufficientPrivilege {
            interface: interface.to_string(),
        },
        _ => RequestError::ConnectFailed(format!("bind to device {interface}: {err}")),
    }
}

/// Selects the [`Binding`] on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BindMode {
    /// Bind the source address; unprivileged.
    #[default]
    Address,
    /// Bind the interface itself; needs elevated privilege.
    Device,
}

impl BindMode {
    pub fn binding(self) -> Box<dyn Binding> {
        match self {
            BindMode::Address => Box::new(AddressBind),
            BindMode::Device => Box::new(DeviceBind),
        }
    }
}
