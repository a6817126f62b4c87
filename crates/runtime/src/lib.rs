//! Request correlation for the devcss bridge.
//!
//! The bridge talks to exactly one browser peer over a long-lived socket and
//! multiplexes many concurrent tool requests onto it. [`Correlator`] owns the
//! table of in-flight requests and the link to the active peer; the socket
//! plumbing lives with the server and only feeds frames in and out.

pub mod correlator;
pub mod error;

pub use correlator::{ConnectionId, Correlator};
pub use error::{Error, Result};
