// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![warn(missing_docs)]
#![allow(clippy::needless_return)]

//! # Runtime-defined USDT providers and probes
//!
//! `usdt_dynamic` lets a process declare and fire user-defined trace
//! probes at runtime, without precompiling a static probe definition
//! file. A provider is a named namespace owning a set of probes; each
//! probe is a named trace point with a typed argument signature fixed
//! when it is attached.
//!
//! # Overview
//!
//! - Create a [Provider] with [`Provider::create`] (or
//!   [`Provider::create_with_module`] for an explicit module name).
//! - Attach one or more [Probe]s with [`Provider::probe`], giving each a
//!   name and an ordered list of argument type tags (`"integer"`,
//!   `"string"`, `"json"`).
//! - Call [`Provider::enable`] to hand the whole probe set to the tracer
//!   registration facility atomically.
//! - Use [`Probe::enabled`] to cheaply check whether a tracer consumer
//!   is watching, and [`Probe::fire`] to trigger the probe with concrete
//!   argument values. Firing an unobserved probe is a near-zero-cost
//!   no-op: no argument is marshaled or validated.
//! - Call [`Provider::disable`] to withdraw visibility while keeping the
//!   probe set, or [`Provider::close`] to release everything. A provider
//!   also closes when dropped.
//!
//! # Example
//!
//! ```
//! use usdt_dynamic::{Provider, Value};
//!
//! # fn main() -> Result<(), usdt_dynamic::UsdtError> {
//! let mut provider = Provider::create_with_module("myapp", "requests")?;
//! let probe = provider.probe(None, "request_done", &["integer", "string"])?;
//! provider.enable()?;
//!
//! // Hot path: nothing is marshaled unless a tracer is attached.
//! if probe.enabled()? {
//!     probe.fire(&[Value::from(200i64), Value::from("/index.html")])?;
//! }
//!
//! provider.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Notes
//!
//! Probe visibility and naming follow the
//! `provider<pid>:module:function:name` convention; external tracer
//! scripts match against these strings, so they are a bit-exact
//! contract.
//!
//! A tracer consumer can attach or detach at any instant between an
//! `enabled` check and the following `fire`. Both calls tolerate the
//! race: a fire overlapping a detach may deliver the event or silently
//! drop it, but never errors or corrupts state.
//!
//! Argument validation is deliberately lazy. Definition errors (names,
//! type tags, argument counts, arity) are always raised eagerly; value
//! errors (type mismatch, 64-bit integer overflow) are only raised while
//! the probe is actually observed.

pub use errors::UsdtError;
pub use probe::Probe;
pub use provider::Provider;
pub use provider::ProviderState;
pub use registry::ObservationState;
pub use registry::ProbeIdentity;
pub use registry::ProbeRegistration;
pub use registry::RegistrationHandle;
pub use registry::TracerRegistry;
pub use tracer::ProcessTracer;
pub use tracer::Record;
pub use tracer::TracedValue;
pub use tracer::TracerSession;
pub use types::marshal;
pub use types::ArgumentType;
pub use types::NativeSlot;
pub use types::Value;
pub use types::USDT_ARG_MAX;

mod errors;
mod probe;
mod provider;
mod registry;
mod tracer;
mod types;
