// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use thiserror::Error;

use crate::types::ArgumentType;
use crate::types::USDT_ARG_MAX;

/// Errors reported by providers, probes, and argument marshaling.
///
/// Definition-time problems (missing names, bad type tags, too many
/// arguments, wrong arity) are detected eagerly and reported no matter
/// what the tracer is doing. Value-level problems ([`UsdtError::TypeMismatch`],
/// [`UsdtError::IntegerOverflow`]) are only detected while a probe is
/// actually observed; firing an unobserved probe never validates its
/// arguments.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UsdtError {
    /// A required provider or probe name was empty.
    #[error("a non-empty name is required")]
    MissingName,

    /// A method was given an argument of the wrong kind, e.g. a probe
    /// passed to `remove_probe` that belongs to a different provider.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A probe argument type tag was not one of `"integer"`, `"string"`,
    /// or `"json"`. Only the exact lowercase tags are accepted.
    #[error("unknown probe argument type: {0:?}")]
    InvalidArgumentType(String),

    /// More than [`USDT_ARG_MAX`] argument types were declared for one probe.
    #[error("maximum number of probe arguments is {USDT_ARG_MAX}; {0} declared")]
    TooManyArguments(usize),

    /// `fire` was called with a different number of values than the
    /// probe's declared signature.
    #[error("probe {probe} declares {expected} arguments; {actual} provided")]
    Arity {
        /// Fully-qualified probe identity.
        probe: String,
        /// Declared argument count.
        expected: usize,
        /// Provided argument count.
        actual: usize,
    },

    /// A fired value cannot be converted to its declared native type.
    #[error("probe argument {index} expects {expected}; got {actual}")]
    TypeMismatch {
        /// Zero-based argument position.
        index: usize,
        /// The declared argument type.
        expected: ArgumentType,
        /// Description of the rejected value.
        actual: &'static str,
    },

    /// A fired integer does not fit in a signed 64-bit native slot.
    #[error("integer {0} does not fit in a signed 64-bit probe argument")]
    IntegerOverflow(i128),

    /// Any operation attempted on a provider (or one of its probes)
    /// after `close`.
    #[error("provider {0} is closed")]
    ClosedProvider(String),

    /// The probe set of an enabled provider cannot be mutated; the
    /// provider must be disabled first.
    #[error("provider {0} is enabled; disable it before changing its probes")]
    ProviderEnabled(String),

    /// The tracer registration facility rejected the probe set.
    #[error("tracer registration failed: {0}")]
    RegistrationFailed(String),

    /// A JSON argument could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
