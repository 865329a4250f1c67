use std::io;
use std::path::PathBuf;

/// Startup failures. Any of these ends the process before the first request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every interface reported by the OS was loopback or had no IPv4 address.
    #[error("found no non-loopback IPv4 address on any interface")]
    NoInterfacesFound,

    /// The requested interface does not exist.
    #[error("network interface not found: {name}")]
    InterfaceNotFound { name: String },

    /// The interface exists but owns no non-loopback IPv4 address.
    #[error("network interface {name} has no usable IPv4 address")]
    NoAddressesForInterface { name: String },

    /// The target list was empty after dropping blank lines.
    #[error("no targets loaded")]
    NoTargetsLoaded,

    /// The source address set handed to the dispatcher was empty.
    #[error("no usable source addresses")]
    NoUsableSources,

    #[error("failed to read targets from {}: {source}", path.display())]
    ReadTargets {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to enumerate network interfaces: {0}")]
    Enumerate(#[source] io::Error),
}
