//! Conditions and error handling (spec §6.4, §7).
//!
//! The condition-type hierarchy proper is named in spec §1 as an
//! out-of-scope external collaborator (it is user-extensible via
//! `define-condition-type` in real Idio). What *is* in scope is the fixed
//! set of condition names the VM itself raises (spec §6.4) and the
//! propagation policy around them (spec §7), so `ConditionType` only
//! enumerates those -- grounded directly on `ouros::exception_private::ExcType`'s
//! shape (a flat `strum`-derived enum with a `Display` matching the
//! canonical name) rather than trying to model user-defined subtyping.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::loc::SourceLoc;
use crate::value::Value;

/// The condition names spec §6.4 fixes verbatim, plus `^evaluation-error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum ConditionType {
    #[strum(serialize = "^rt-variable-unbound")]
    RtVariableUnbound,
    #[strum(serialize = "^rt-module-error")]
    RtModuleError,
    #[strum(serialize = "^rt-module-symbol-unbound-error")]
    RtModuleSymbolUnboundError,
    #[strum(serialize = "^rt-hash-error")]
    RtHashError,
    #[strum(serialize = "^rt-hash-key-not-found-error")]
    RtHashKeyNotFoundError,
    #[strum(serialize = "^rt-keyword-error")]
    RtKeywordError,
    #[strum(serialize = "^rt-struct-error")]
    RtStructError,
    #[strum(serialize = "^rt-path-error")]
    RtPathError,
    #[strum(serialize = "^rt-glob-error")]
    RtGlobError,
    #[strum(serialize = "^rt-vtable-unbound-error")]
    RtVtableUnboundError,
    #[strum(serialize = "^rt-vtable-method-unbound-error")]
    RtVtableMethodUnboundError,
    #[strum(serialize = "^st-variable-error")]
    StVariableError,
    #[strum(serialize = "^st-function-arity-error")]
    StFunctionArityError,
    #[strum(serialize = "^evaluation-error")]
    EvaluationError,
}

/// Every `ConditionType` variant, in declaration order -- the table
/// `to_byte`/`from_byte` index into so a `PUSH_ITRAP` can carry the
/// condition it guards as a single bytecode operand.
const ALL: [ConditionType; 14] = [
    ConditionType::RtVariableUnbound,
    ConditionType::RtModuleError,
    ConditionType::RtModuleSymbolUnboundError,
    ConditionType::RtHashError,
    ConditionType::RtHashKeyNotFoundError,
    ConditionType::RtKeywordError,
    ConditionType::RtStructError,
    ConditionType::RtPathError,
    ConditionType::RtGlobError,
    ConditionType::RtVtableUnboundError,
    ConditionType::RtVtableMethodUnboundError,
    ConditionType::StVariableError,
    ConditionType::StFunctionArityError,
    ConditionType::EvaluationError,
];

impl ConditionType {
    /// Encodes this condition type as the byte `PUSH_ITRAP` carries.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        ALL.iter().position(|&c| c == self).expect("ALL covers every variant") as u8
    }

    /// Decodes a byte written by [`Self::to_byte`].
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        ALL[byte as usize]
    }

    /// Whether a handler for this condition may return normally (spec §7:
    /// "Errors detected during primitive invocation raise a continuable
    /// condition unless the error kind is fatal"). Static/evaluation errors
    /// and module/arity errors are non-continuable; most runtime lookup
    /// failures are continuable so a trap handler can supply a substitute
    /// value (spec §8 scenario 4).
    #[must_use]
    pub fn is_continuable(self) -> bool {
        !matches!(
            self,
            Self::EvaluationError | Self::StVariableError | Self::StFunctionArityError
        )
    }
}

/// A non-local jump carried inside a [`RunError`] so invoking an escape
/// continuation can unwind the Rust call stack through `?` like any other
/// error, and be caught specifically by the `call/cc` frame whose `tag`
/// matches (spec §4.5). Continuations built this way are escape-only:
/// invoking one after its capturing `call/cc` has already returned has
/// nothing left to catch it and propagates as an ordinary error (see
/// DESIGN.md).
#[derive(Debug, Clone)]
pub struct ContinuationUnwind {
    pub tag: u64,
    pub value: Value,
}

/// A raised condition: type, message, stringified detail, source location,
/// and (optionally) the offending value's printed form (spec §7 "a
/// condition carries message, location, detail, and possibly the offending
/// value"), or a continuation invocation riding the same `Result` plumbing.
#[derive(Debug, Clone)]
pub struct RunError {
    pub condition: ConditionType,
    pub message: String,
    pub detail: Option<String>,
    pub location: Option<SourceLoc>,
    pub continuation: Option<ContinuationUnwind>,
}

impl RunError {
    #[must_use]
    pub fn new(condition: ConditionType, message: impl Into<String>) -> Self {
        Self {
            condition,
            message: message.into(),
            detail: None,
            location: None,
            continuation: None,
        }
    }

    #[must_use]
    pub fn continuation_invoke(tag: u64, value: Value) -> Self {
        Self {
            condition: ConditionType::EvaluationError,
            message: "continuation invoked outside its dynamic extent".into(),
            detail: None,
            location: None,
            continuation: Some(ContinuationUnwind { tag, value }),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: SourceLoc) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn is_continuable(&self) -> bool {
        self.condition.is_continuable()
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", <&str>::from(self.condition), self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        if let Some(loc) = &self.location {
            write!(f, " at {loc}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RunError {}

/// Result type alias for operations that can raise an Idio condition.
pub type RunResult<T> = Result<T, RunError>;
