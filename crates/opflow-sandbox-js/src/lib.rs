//! Embedded JavaScript sandbox for Opflow flows, using boa_engine.
//!
//! Implements the `FlowSandbox` trait from opflow-core: stored source is
//! wrapped as the body of an anonymous async function, evaluated in an
//! isolated engine context with a capability-limited surface (repositories,
//! transaction handle, console routed to the host log, timer shims), and
//! bounded by a hard wall-clock timeout.

mod bridge;
mod sandbox;

pub use sandbox::{JsFlowSandbox, JsSandboxConfig};
