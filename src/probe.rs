// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::errors::UsdtError;
use crate::provider::ProviderShared;
use crate::registry::ObservationState;
use crate::registry::ProbeIdentity;
use crate::registry::RegistrationHandle;
use crate::types::marshal;
use crate::types::ArgumentType;
use crate::types::Value;
use crate::types::USDT_ARG_MAX;

/// A named trace point owned by a [`Provider`](crate::Provider).
///
/// A probe's argument signature is fixed when it is attached. Firing and
/// the `enabled` check do not mutate any probe metadata, so they are
/// safe to call concurrently from multiple threads while the owning
/// provider's probe set is stable.
pub struct Probe {
    identity: ProbeIdentity,
    argument_types: Vec<ArgumentType>,
    observation: Arc<ObservationState>,
    provider: Arc<ProviderShared>,
}

impl Probe {
    /// Validates a probe definition and binds it to its owning provider.
    /// The provider has already checked its own lifecycle state.
    pub(crate) fn attach(
        provider: &Arc<ProviderShared>,
        function: Option<&str>,
        name: &str,
        type_tags: &[&str],
    ) -> Result<Arc<Self>, UsdtError> {
        if name.is_empty() {
            return Err(UsdtError::MissingName);
        }
        if type_tags.len() > USDT_ARG_MAX {
            return Err(UsdtError::TooManyArguments(type_tags.len()));
        }

        let argument_types = type_tags
            .iter()
            .map(|tag| ArgumentType::classify(tag))
            .collect::<Result<Vec<_>, _>>()?;

        let identity = ProbeIdentity {
            provider: provider.provider_name.clone(),
            module: provider.module.clone(),
            function: function.unwrap_or("func").to_string(),
            name: name.to_string(),
        };

        return Ok(Arc::new(Self {
            identity,
            argument_types,
            observation: Arc::new(ObservationState::new(0)),
            provider: provider.clone(),
        }));
    }

    /// Returns the probe's function name (`"func"` unless one was given).
    pub fn function(&self) -> &str {
        return &self.identity.function;
    }

    /// Returns the probe's name.
    pub fn name(&self) -> &str {
        return &self.identity.name;
    }

    /// Returns the probe's declared argument types, in order.
    pub fn argument_types(&self) -> &[ArgumentType] {
        return &self.argument_types;
    }

    /// Returns the probe's fully-qualified identity.
    pub fn identity(&self) -> &ProbeIdentity {
        return &self.identity;
    }

    pub(crate) fn observation(&self) -> &Arc<ObservationState> {
        return &self.observation;
    }

    /// Returns true if a tracer consumer is currently attached to this
    /// specific probe.
    ///
    /// A relaxed atomic load: cheap, side-effect-free, safe to call at
    /// high frequency to gate expensive argument construction. The
    /// answer can go stale between this call and a subsequent
    /// [`fire`](Self::fire); `fire` re-checks.
    ///
    /// Fails with [`UsdtError::ClosedProvider`] once the owning provider
    /// is closed.
    #[inline]
    pub fn enabled(&self) -> Result<bool, UsdtError> {
        self.provider.guard_open()?;
        return Ok(self.observation.enabled());
    }

    /// Fires the probe with one value per declared argument.
    ///
    /// Returns `Ok(false)` without marshaling anything when the provider
    /// is not enabled or nobody is observing this probe; value-level
    /// problems in `args` are not detected in that case. When observed,
    /// every argument is marshaled per its declared type (the first
    /// failure surfaces), the native trigger is invoked, and `Ok(true)`
    /// is returned.
    ///
    /// An arity mismatch is a definition-level error and fails with
    /// [`UsdtError::Arity`] whether or not anyone is watching.
    pub fn fire(&self, args: &[Value]) -> Result<bool, UsdtError> {
        self.provider.guard_open()?;

        if args.len() != self.argument_types.len() {
            return Err(UsdtError::Arity {
                probe: self.identity.to_string(),
                expected: self.argument_types.len(),
                actual: args.len(),
            });
        }

        if !self.observation.enabled() {
            return Ok(false);
        }

        // The provider could have been disabled between the check above
        // and here; a zero handle means the registration is gone.
        let handle = self.provider.handle.load(Ordering::Relaxed);
        if handle == 0 {
            return Ok(false);
        }

        let mut slots = Vec::with_capacity(args.len());
        for (index, (value, ty)) in args.iter().zip(&self.argument_types).enumerate() {
            slots.push(marshal(index, value, *ty)?);
        }

        self.provider.registry.trigger(
            RegistrationHandle::from_int(handle),
            &self.identity,
            &slots,
        );
        log::trace!("fired probe {}", self.identity);
        return Ok(true);
    }
}

impl fmt::Display for Probe {
    /// Renders `provider:module:function:name`, where `provider`
    /// includes the process-scope suffix.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return self.identity.fmt(f);
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(
            f,
            "Probe {{ identity: \"{}\", argument_types: {:?} }}",
            self.identity, self.argument_types,
        );
    }
}
