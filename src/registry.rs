// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::fmt;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::errors::UsdtError;
use crate::types::NativeSlot;

/// Fully-qualified identity of one probe.
///
/// Renders as `provider:module:function:name`; the provider field
/// includes any process-scope suffix the provider was created with.
/// External tracer scripts match against this string, so its shape is a
/// bit-exact contract.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProbeIdentity {
    /// Provider name, including the pid suffix for process-scoped providers.
    pub provider: String,
    /// Provider module (secondary namespace qualifier).
    pub module: String,
    /// Probe function name.
    pub function: String,
    /// Probe name.
    pub name: String,
}

impl fmt::Display for ProbeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(
            f,
            "{}:{}:{}:{}",
            self.provider, self.module, self.function, self.name
        );
    }
}

/// Per-probe observation word, shared between a probe and the tracer
/// registration facility.
///
/// The facility updates the word when consumers attach or detach; the
/// probe's fast path only ever performs a relaxed load. The word may be
/// stale with respect to an in-flight attach or detach; a stale answer
/// is acceptable, never a correctness bug.
pub struct ObservationState {
    observers: AtomicU32,
}

impl ObservationState {
    /// Creates an observation word with the given initial observer count.
    /// Probes start at 0 (unobserved).
    pub const fn new(initial_observers: u32) -> Self {
        return Self {
            observers: AtomicU32::new(initial_observers),
        };
    }

    /// Returns true if at least one consumer is currently attached.
    #[inline(always)]
    pub fn enabled(&self) -> bool {
        return 0 != self.observers.load(Ordering::Relaxed);
    }

    /// Records one more attached consumer.
    pub fn observe(&self) {
        self.observers.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one detached consumer. Saturates at zero so a detach that
    /// races with an unregister (which resets the word) stays harmless.
    pub fn unobserve(&self) {
        let _ = self
            .observers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                n.checked_sub(1)
            });
    }

    /// Resets the word to unobserved. Called by the facility when the
    /// owning provider unregisters.
    pub fn clear(&self) {
        self.observers.store(0, Ordering::Relaxed);
    }
}

impl fmt::Debug for ObservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(
            f,
            "ObservationState {{ observers: {} }}",
            self.observers.load(Ordering::Relaxed)
        );
    }
}

/// One probe definition handed to the facility at registration time.
pub struct ProbeRegistration {
    /// The probe's fully-qualified identity.
    pub identity: ProbeIdentity,
    /// The probe's observation word. The facility flips this directly so
    /// that the probe's `enabled` check never has to call back in.
    pub observation: Arc<ObservationState>,
}

/// Opaque token for one registered provider probe set.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RegistrationHandle(u64);

impl RegistrationHandle {
    /// Returns a RegistrationHandle with the specified value. Facility
    /// implementations mint handles; zero is reserved for "not registered".
    pub const fn from_int(value: u64) -> Self {
        return Self(value);
    }

    /// Returns the numeric value corresponding to this handle.
    pub const fn as_int(self) -> u64 {
        return self.0;
    }
}

/// The tracer registration facility: the mechanism by which an enabled
/// provider's probes become visible to a system tracer.
///
/// [`crate::ProcessTracer`] is the in-process implementation; a custom
/// implementation can be supplied through
/// [`Provider::create_on`](crate::Provider::create_on).
pub trait TracerRegistry: Send + Sync {
    /// Makes the whole probe set visible as one unit. Either every probe
    /// in `probes` becomes visible or none does; a partially-registered
    /// provider must never be observable.
    fn register(
        &self,
        provider: &str,
        probes: Vec<ProbeRegistration>,
    ) -> Result<RegistrationHandle, UsdtError>;

    /// Withdraws the probe set and resets every probe's observation word.
    /// Unknown handles are ignored.
    fn unregister(&self, handle: RegistrationHandle);

    /// Reports whether the given probe currently has an attached consumer.
    fn is_observed(&self, handle: RegistrationHandle, probe: &ProbeIdentity) -> bool;

    /// Delivers one fired event. Fire-and-forget: if the probe is not
    /// observed (or the handle is stale) this is a no-op, never an error.
    fn trigger(&self, handle: RegistrationHandle, probe: &ProbeIdentity, values: &[NativeSlot]);
}
