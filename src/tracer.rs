// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::Weak;

use log::debug;
use log::trace;

use crate::errors::UsdtError;
use crate::registry::ObservationState;
use crate::registry::ProbeIdentity;
use crate::registry::ProbeRegistration;
use crate::registry::RegistrationHandle;
use crate::registry::TracerRegistry;
use crate::types::NativeSlot;

// Note: this is intentionally leaked.
static GLOBAL_TRACER: OnceLock<Arc<ProcessTracer>> = OnceLock::new();

/// The in-process tracer registration facility.
///
/// Implements [`TracerRegistry`] for providers, and additionally models
/// the observable half of a system tracer: listing registered probes by
/// pattern, attaching a consumer ([`TracerSession`]) so that matching
/// probes report `enabled`, and handing captured records back to the
/// consumer.
pub struct ProcessTracer {
    inner: Mutex<TracerInner>,
}

struct TracerInner {
    next_handle: u64,
    providers: HashMap<u64, RegisteredProvider>,
    sessions: Vec<Weak<SessionShared>>,
}

struct RegisteredProvider {
    identity: String,
    probes: Vec<ProbeRegistration>,
}

impl ProcessTracer {
    /// Creates an empty, standalone tracer. Useful for tests that want a
    /// facility isolated from the rest of the process.
    pub fn new() -> Self {
        return Self {
            inner: Mutex::new(TracerInner {
                next_handle: 1,
                providers: HashMap::new(),
                sessions: Vec::new(),
            }),
        };
    }

    /// Returns the process-wide tracer instance used by
    /// [`Provider::create`](crate::Provider::create).
    pub fn global() -> Arc<Self> {
        return GLOBAL_TRACER.get_or_init(|| Arc::new(Self::new())).clone();
    }

    /// Returns the identities of all registered probes matching
    /// `pattern`, sorted.
    ///
    /// A pattern has up to four `:`-separated fields,
    /// `provider:module:function:name`. An empty or missing field
    /// matches anything; a field ending in `*` is a prefix match;
    /// anything else must match exactly. `"foo1234:::"` matches every
    /// probe of provider `foo1234`.
    pub fn list_probes(&self, pattern: &str) -> Vec<String> {
        let pattern = ProbePattern::parse(pattern);
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner
            .providers
            .values()
            .flat_map(|p| p.probes.iter())
            .filter(|p| pattern.matches(&p.identity))
            .map(|p| p.identity.to_string())
            .collect();
        names.sort();
        return names;
    }

    /// Returns the number of registered probes matching `pattern`.
    pub fn probe_count(&self, pattern: &str) -> usize {
        return self.list_probes(pattern).len();
    }

    /// Attaches a consumer to every currently-registered probe matching
    /// `pattern`. While the session is live, those probes report
    /// `enabled` and their fired records are captured for
    /// [`TracerSession::records`]. Probes registered after the attach
    /// are not observed by this session.
    pub fn attach(&self, pattern: &str) -> TracerSession {
        let pattern = ProbePattern::parse(pattern);
        let mut inner = self.inner.lock().unwrap();

        let observed: Vec<Arc<ObservationState>> = inner
            .providers
            .values()
            .flat_map(|p| p.probes.iter())
            .filter(|p| pattern.matches(&p.identity))
            .map(|p| p.observation.clone())
            .collect();
        for flag in &observed {
            flag.observe();
        }

        let shared = Arc::new(SessionShared {
            pattern,
            active: AtomicBool::new(true),
            records: Mutex::new(Vec::new()),
        });
        inner.sessions.retain(|s| s.strong_count() > 0);
        inner.sessions.push(Arc::downgrade(&shared));
        debug!("tracer session attached ({} probes observed)", observed.len());

        return TracerSession {
            shared,
            observed,
            detached: false,
        };
    }
}

impl Default for ProcessTracer {
    fn default() -> Self {
        return Self::new();
    }
}

impl TracerRegistry for ProcessTracer {
    fn register(
        &self,
        provider: &str,
        probes: Vec<ProbeRegistration>,
    ) -> Result<RegistrationHandle, UsdtError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.providers.values().any(|p| p.identity == provider) {
            return Err(UsdtError::RegistrationFailed(format!(
                "provider {} is already registered",
                provider
            )));
        }

        let handle = inner.next_handle;
        inner.next_handle += 1;
        debug!("registered provider {} ({} probes)", provider, probes.len());
        inner.providers.insert(
            handle,
            RegisteredProvider {
                identity: provider.to_string(),
                probes,
            },
        );
        return Ok(RegistrationHandle::from_int(handle));
    }

    fn unregister(&self, handle: RegistrationHandle) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(removed) = inner.providers.remove(&handle.as_int()) {
            // Firing probes will see an unobserved state immediately even
            // if a consumer still holds the flag.
            for probe in &removed.probes {
                probe.observation.clear();
            }
            debug!("unregistered provider {}", removed.identity);
        }
    }

    fn is_observed(&self, handle: RegistrationHandle, probe: &ProbeIdentity) -> bool {
        let inner = self.inner.lock().unwrap();
        return inner
            .providers
            .get(&handle.as_int())
            .and_then(|p| p.probes.iter().find(|r| &r.identity == probe))
            .is_some_and(|r| r.observation.enabled());
    }

    fn trigger(&self, handle: RegistrationHandle, probe: &ProbeIdentity, values: &[NativeSlot]) {
        let inner = self.inner.lock().unwrap();

        let registered = match inner
            .providers
            .get(&handle.as_int())
            .and_then(|p| p.probes.iter().find(|r| &r.identity == probe))
        {
            Some(registered) => registered,
            // Stale handle or unknown probe: fire-and-forget, drop it.
            None => return,
        };
        if !registered.observation.enabled() {
            return;
        }

        let record = Record {
            probe: probe.to_string(),
            values: values.iter().map(TracedValue::decode).collect(),
        };
        trace!("captured {:?}", record);

        for session in &inner.sessions {
            if let Some(session) = session.upgrade() {
                if session.active.load(Ordering::Relaxed) && session.pattern.matches(probe) {
                    session.records.lock().unwrap().push(record.clone());
                }
            }
        }
    }
}

struct SessionShared {
    pattern: ProbePattern,
    active: AtomicBool,
    records: Mutex<Vec<Record>>,
}

/// A consumer attached to a set of probes via [`ProcessTracer::attach`].
///
/// Matching probes report `enabled` for as long as the session is live;
/// dropping or detaching the session ends the observation window.
pub struct TracerSession {
    shared: Arc<SessionShared>,
    observed: Vec<Arc<ObservationState>>,
    detached: bool,
}

impl TracerSession {
    /// Drains and returns the records captured so far.
    pub fn records(&self) -> Vec<Record> {
        return std::mem::take(&mut *self.shared.records.lock().unwrap());
    }

    /// Ends the observation window. Idempotent; also happens on drop.
    /// A fire racing with the detach may or may not be captured.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.shared.active.store(false, Ordering::Relaxed);
        for flag in &self.observed {
            flag.unobserve();
        }
        debug!("tracer session detached");
    }
}

impl Drop for TracerSession {
    fn drop(&mut self) {
        self.detach();
    }
}

/// One captured probe firing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    /// The fired probe's `provider:module:function:name` identity.
    pub probe: String,
    /// The captured argument values, in declared order.
    pub values: Vec<TracedValue>,
}

/// A captured native argument value, as a tracer consumer would decode it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TracedValue {
    /// From a signed 64-bit slot.
    Integer(i64),
    /// From a pointer-to-bytes slot, decoded as UTF-8 without the
    /// terminator.
    Text(String),
}

impl TracedValue {
    fn decode(slot: &NativeSlot) -> Self {
        return match slot {
            NativeSlot::Integer(v) => Self::Integer(*v),
            NativeSlot::Bytes(bytes) => Self::Text(bytes.to_string_lossy().into_owned()),
        };
    }
}

struct ProbePattern {
    fields: Vec<String>,
}

impl ProbePattern {
    fn parse(pattern: &str) -> Self {
        return Self {
            fields: pattern.splitn(4, ':').map(str::to_string).collect(),
        };
    }

    fn matches(&self, identity: &ProbeIdentity) -> bool {
        let parts = [
            identity.provider.as_str(),
            identity.module.as_str(),
            identity.function.as_str(),
            identity.name.as_str(),
        ];
        return self
            .fields
            .iter()
            .zip(parts)
            .all(|(field, part)| Self::field_matches(field, part));
    }

    fn field_matches(field: &str, part: &str) -> bool {
        if field.is_empty() {
            return true;
        }
        return match field.strip_suffix('*') {
            Some(prefix) => part.starts_with(prefix),
            None => field == part,
        };
    }
}
