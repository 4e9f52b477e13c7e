// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::fmt;
use std::process;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;

use crate::errors::UsdtError;
use crate::probe::Probe;
use crate::registry::ProbeRegistration;
use crate::registry::RegistrationHandle;
use crate::registry::TracerRegistry;
use crate::tracer::ProcessTracer;

const LIFECYCLE_REGISTERED: u8 = 0;
const LIFECYCLE_ENABLED: u8 = 1;
const LIFECYCLE_CLOSED: u8 = 2;

/// Lifecycle state of a [`Provider`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderState {
    /// Created; probes may be attached and removed. Not visible to tracers.
    Registered,
    /// Probe set registered with the tracer facility; the set is frozen.
    Enabled,
    /// Native resources released; every further operation fails.
    Closed,
}

/// State shared between a provider and its probes. Probes only ever read
/// the lifecycle and handle words, so no lock is needed on the fire path.
pub(crate) struct ProviderShared {
    /// Provider name with the process-scope suffix, e.g. `"foo1234"`.
    pub(crate) provider_name: String,
    pub(crate) module: String,
    pub(crate) registry: Arc<dyn TracerRegistry>,
    lifecycle: AtomicU8,
    /// Current registration, or 0 while not enabled.
    pub(crate) handle: AtomicU64,
}

impl ProviderShared {
    pub(crate) fn guard_open(&self) -> Result<(), UsdtError> {
        if self.lifecycle.load(Ordering::Relaxed) == LIFECYCLE_CLOSED {
            return Err(UsdtError::ClosedProvider(self.provider_name.clone()));
        }
        return Ok(());
    }
}

/// A named namespace owning a set of probes, activated and deactivated
/// as a unit.
///
/// Lifecycle: create, attach probes, [`enable`](Self::enable) (the whole
/// probe set becomes visible to the tracer atomically), fire probes,
/// [`disable`](Self::disable) or [`close`](Self::close). The probe set
/// is immutable while enabled.
///
/// A provider's own lifecycle operations are not internally locked;
/// callers must serialize `enable`/`disable`/`close` and probe-set
/// mutation externally. `fire` and `enabled` on a stable, enabled probe
/// set need no extra synchronization.
pub struct Provider {
    name: String,
    probes: Vec<Arc<Probe>>,
    shared: Arc<ProviderShared>,
}

impl Provider {
    /// Creates a provider on the process-wide tracer, with the module
    /// defaulting to `name`.
    ///
    /// Fails with [`UsdtError::MissingName`] if `name` is empty.
    pub fn create(name: &str) -> Result<Self, UsdtError> {
        return Self::create_on(ProcessTracer::global(), name, None);
    }

    /// Creates a provider on the process-wide tracer with an explicit
    /// module name.
    pub fn create_with_module(name: &str, module: &str) -> Result<Self, UsdtError> {
        return Self::create_on(ProcessTracer::global(), name, Some(module));
    }

    /// Creates a provider registered against a specific tracer facility.
    /// `module` falls back to `name` when `None` or empty.
    pub fn create_on(
        registry: Arc<dyn TracerRegistry>,
        name: &str,
        module: Option<&str>,
    ) -> Result<Self, UsdtError> {
        if name.is_empty() {
            return Err(UsdtError::MissingName);
        }

        let module = match module {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => name.to_string(),
        };

        let shared = Arc::new(ProviderShared {
            provider_name: format!("{}{}", name, process::id()),
            module,
            registry,
            lifecycle: AtomicU8::new(LIFECYCLE_REGISTERED),
            handle: AtomicU64::new(0),
        });

        debug!(
            "created provider {} (module {})",
            shared.provider_name, shared.module
        );

        return Ok(Self {
            name: name.to_string(),
            probes: Vec::new(),
            shared,
        });
    }

    /// Returns the provider's name as given at creation, without the
    /// process-scope suffix.
    pub fn name(&self) -> &str {
        return &self.name;
    }

    /// Returns the provider name a tracer sees: the name plus the pid
    /// suffix, e.g. `"foo1234"`.
    pub fn scoped_name(&self) -> &str {
        return &self.shared.provider_name;
    }

    /// Returns the provider's module name.
    pub fn module(&self) -> &str {
        return &self.shared.module;
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ProviderState {
        return match self.shared.lifecycle.load(Ordering::Relaxed) {
            LIFECYCLE_ENABLED => ProviderState::Enabled,
            LIFECYCLE_CLOSED => ProviderState::Closed,
            _ => ProviderState::Registered,
        };
    }

    /// Returns the attached probes in attach order.
    pub fn probes(&self) -> &[Arc<Probe>] {
        return &self.probes;
    }

    /// Returns the current tracer registration, or `None` while the
    /// provider is not enabled.
    pub fn registration(&self) -> Option<RegistrationHandle> {
        return match self.shared.handle.load(Ordering::Relaxed) {
            0 => None,
            handle => Some(RegistrationHandle::from_int(handle)),
        };
    }

    /// Attaches a probe with the given function name (`None` defaults to
    /// `"func"`), probe name, and argument type tags.
    ///
    /// Each tag must be exactly `"integer"`, `"string"`, or `"json"`;
    /// at most [`USDT_ARG_MAX`](crate::USDT_ARG_MAX) tags are accepted.
    /// Fails with [`UsdtError::ProviderEnabled`] while the provider is
    /// enabled; `disable` first.
    pub fn probe(
        &mut self,
        function: Option<&str>,
        name: &str,
        type_tags: &[&str],
    ) -> Result<Arc<Probe>, UsdtError> {
        self.guard_mutable()?;

        let probe = Probe::attach(&self.shared, function, name, type_tags)?;
        debug!("attached probe {}", probe);
        self.probes.push(probe.clone());
        return Ok(probe);
    }

    /// Detaches a probe previously returned by [`probe`](Self::probe).
    ///
    /// Fails with [`UsdtError::InvalidArgument`] if the probe does not
    /// belong to this provider, and with [`UsdtError::ProviderEnabled`]
    /// while the provider is enabled.
    pub fn remove_probe(&mut self, probe: &Arc<Probe>) -> Result<(), UsdtError> {
        self.guard_mutable()?;

        let position = self.probes.iter().position(|p| Arc::ptr_eq(p, probe));
        return match position {
            Some(index) => {
                let removed = self.probes.remove(index);
                debug!("removed probe {}", removed);
                Ok(())
            }
            None => Err(UsdtError::InvalidArgument(format!(
                "probe {} is not attached to provider {}",
                probe, self.shared.provider_name
            ))),
        };
    }

    /// Registers the full current probe set with the tracer facility and
    /// freezes it. All-or-nothing: on failure nothing becomes visible
    /// and the provider stays in [`ProviderState::Registered`].
    ///
    /// Idempotent; enabling an enabled provider is a no-op.
    pub fn enable(&mut self) -> Result<(), UsdtError> {
        match self.state() {
            ProviderState::Closed => {
                return Err(UsdtError::ClosedProvider(self.shared.provider_name.clone()))
            }
            ProviderState::Enabled => return Ok(()),
            ProviderState::Registered => {}
        }

        let registrations: Vec<ProbeRegistration> = self
            .probes
            .iter()
            .map(|p| ProbeRegistration {
                identity: p.identity().clone(),
                observation: p.observation().clone(),
            })
            .collect();

        let handle = self
            .shared
            .registry
            .register(&self.shared.provider_name, registrations)?;
        self.shared.handle.store(handle.as_int(), Ordering::Relaxed);
        self.shared
            .lifecycle
            .store(LIFECYCLE_ENABLED, Ordering::Relaxed);
        debug!(
            "enabled provider {} ({} probes)",
            self.shared.provider_name,
            self.probes.len()
        );
        return Ok(());
    }

    /// Withdraws the probe set from tracer visibility, retaining the
    /// probes for a later re-enable.
    ///
    /// Idempotent; disabling a non-enabled provider is a no-op.
    pub fn disable(&mut self) -> Result<(), UsdtError> {
        match self.state() {
            ProviderState::Closed => {
                return Err(UsdtError::ClosedProvider(self.shared.provider_name.clone()))
            }
            ProviderState::Registered => return Ok(()),
            ProviderState::Enabled => {}
        }

        self.unregister();
        self.shared
            .lifecycle
            .store(LIFECYCLE_REGISTERED, Ordering::Relaxed);
        debug!("disabled provider {}", self.shared.provider_name);
        return Ok(());
    }

    /// Releases the provider's resources and those of every owned probe.
    ///
    /// Idempotent; closing twice is a no-op. After `close`, every other
    /// operation on the provider or its probes fails with
    /// [`UsdtError::ClosedProvider`]. The provider also closes when
    /// dropped.
    pub fn close(&mut self) {
        if self.state() == ProviderState::Closed {
            return;
        }

        self.unregister();
        self.shared
            .lifecycle
            .store(LIFECYCLE_CLOSED, Ordering::Relaxed);
        self.probes.clear();
        debug!("closed provider {}", self.shared.provider_name);
    }

    fn unregister(&self) {
        let handle = self.shared.handle.swap(0, Ordering::Relaxed);
        if handle != 0 {
            self.shared
                .registry
                .unregister(RegistrationHandle::from_int(handle));
        }
    }

    fn guard_mutable(&self) -> Result<(), UsdtError> {
        return match self.state() {
            ProviderState::Closed => {
                Err(UsdtError::ClosedProvider(self.shared.provider_name.clone()))
            }
            ProviderState::Enabled => {
                Err(UsdtError::ProviderEnabled(self.shared.provider_name.clone()))
            }
            ProviderState::Registered => Ok(()),
        };
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(
            f,
            "Provider {{ name: \"{}\", module: \"{}\", state: {:?}, probes: {} }}",
            self.shared.provider_name,
            self.shared.module,
            self.state(),
            self.probes.len(),
        );
    }
}
