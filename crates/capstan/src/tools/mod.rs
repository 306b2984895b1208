//! Tool definitions, argument schemas, and the registry.
//!
//! Every capability the model can invoke is a [`Tool`] implementor with an
//! [`ArgSchema`] contract. Tools are collected into a [`ToolRegistry`]
//! during startup; the pipeline resolves names against it and validates
//! arguments before anything executes.
//!
//! - [`registry`] — [`Tool`] / [`ToolInvocation`] traits, [`FnTool`],
//!   [`ToolRegistry`], declaration budgets.
//! - [`schema`] — [`ArgSchema`], [`FieldSpec`], [`NormalizedArgs`].

pub mod registry;
pub mod schema;

pub use registry::{
    AlreadyRegistered, ConfirmationDetails, DeclarationBudget, FnTool, InvocationFuture, Tool,
    ToolInvocation, ToolKind, ToolOutput, ToolRegistry, TrimReport,
};
pub use schema::{ArgKind, ArgSchema, FieldSpec, NormalizedArgs};
