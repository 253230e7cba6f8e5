//! Admin layer.
//!
//! Commands from an operator, the JSON shapes they travel in, status
//! snapshots and pairing of networked services.

pub mod controller;
pub mod protocol;
pub mod services;

pub use controller::{generate_config, list_modules, parse_form, AdminController, AdminError};
pub use protocol::{
    AdminCommand, AdminResponse, AutoconfRequest, ComponentInfo, DebugEventKind, PairRequest, StatusReport, SummaryInfo,
};
pub use services::{PairedService, ServiceError, ServiceEvent, ServiceFactory, ServiceRegistry};
