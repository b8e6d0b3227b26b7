//! Tool infrastructure - registry, parameter schemas, auth gate and shared
//! argument helpers.

pub mod args;
pub mod auth;
pub mod registry;
pub mod schema;

pub use auth::AuthGate;
pub use registry::{ToolDescriptor, ToolHandler, ToolInfo, ToolRegistry};
pub use schema::{ParamDef, ParamType};
