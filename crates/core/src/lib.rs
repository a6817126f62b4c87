//! Browser-side half of the devcss bridge.
//!
//! The browser peer keeps a mirror of each inspected tab's DOM, hands out
//! short stable uids for nodes it reports, and answers tool requests coming
//! from the bridge socket.
//!
//! # Main Types
//!
//! - [`ToolHost`] - Routes tool requests to per-tab sessions
//! - [`SessionManager`] - One inspector session per tab, attached on demand
//! - [`NodeRegistry`] - uid ↔ node bindings that never keep nodes alive
//! - [`DomTree`] - Generation-tagged arena holding a document mirror
//! - [`Debugger`] / [`Inspector`] - Seams to the browser's debugging capability

pub mod dispatch;
pub mod dom;
pub mod error;
pub mod expression;
pub mod html;
pub mod inspector;
pub mod peer;
pub mod registry;
pub mod session;
pub mod styles;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dispatch::ToolHost;
pub use dom::{DocumentId, DomError, DomTree, NodeData, NodeId, SharedDom};
pub use error::{Error, Result};
pub use expression::{DomEvaluator, PathEvaluator};
pub use html::{SerializeOptions, serialize};
pub use inspector::{Debugger, Inspector, InspectorOptions, MatchedStylesOptions};
pub use peer::{PeerConfig, run_peer};
pub use registry::NodeRegistry;
pub use session::{InspectorSession, SessionManager};
pub use styles::{MatchedStyles, StyleFilter};
