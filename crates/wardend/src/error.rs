//! Errors returned by entity operations requested from outside the loop.

use thiserror::Error;

/// Errors raised while creating an entity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The unit identifier does not carry the `.busname` suffix.
    #[error("unit '{unit}' is not a bus name unit")]
    NotBusNameUnit {
        /// Offending unit identifier.
        unit: String,
    },
    /// The configured name is not a valid bus service name.
    #[error("{unit}: name '{name}' is not a valid service name, refusing")]
    InvalidName {
        /// Unit carrying the name.
        unit: String,
        /// Rejected name.
        name: String,
    },
    /// The configured name does not match the unit identifier.
    #[error("{unit}: name '{name}' does not match the unit name, refusing")]
    NameMismatch {
        /// Unit carrying the name.
        unit: String,
        /// Configured name.
        name: String,
    },
    /// An entity with the same identity is already loaded.
    #[error("{entity} is already loaded")]
    Duplicate {
        /// Identity of the existing entity.
        entity: String,
    },
    /// The device reported no usable interface index.
    #[error("device '{ifname}' has no valid interface index")]
    InvalidInterfaceIndex {
        /// Interface name reported with the device.
        ifname: String,
    },
}

/// Errors raised when a start request is refused before any stage runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StartError {
    /// The dependent service is not loaded.
    #[error("{unit}: bus service {service} not loaded, refusing")]
    DependencyNotLoaded {
        /// Unit that was asked to start.
        unit: String,
        /// Service it activates.
        service: String,
    },
    /// No entity with this identity is known.
    #[error("no such entity: {entity}")]
    UnknownEntity {
        /// Requested identity.
        entity: String,
    },
}

/// Errors raised when a stop request cannot be honoured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StopError {
    /// No entity with this identity is known.
    #[error("no such entity: {entity}")]
    UnknownEntity {
        /// Requested identity.
        entity: String,
    },
}
