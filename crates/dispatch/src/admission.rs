//! Admission policy: compile, skip or reject.

use aotserver_cache::ResidentMethod;

use crate::sink::CompletionStatus;

/// Decision taken for one request. Exactly one is produced per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Proceed,
    SkipAlreadyCompiled,
    RejectClassNotCached,
    RejectMethodNotFound,
}

impl AdmissionOutcome {
    /// Status to report when the request stops at admission, `None` for
    /// [`AdmissionOutcome::Proceed`].
    pub fn terminal_status(self) -> Option<CompletionStatus> {
        match self {
            AdmissionOutcome::Proceed => None,
            AdmissionOutcome::SkipAlreadyCompiled => Some(CompletionStatus::NotNeeded),
            AdmissionOutcome::RejectClassNotCached | AdmissionOutcome::RejectMethodNotFound => {
                Some(CompletionStatus::Failure)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionOutcome::Proceed => "proceed",
            AdmissionOutcome::SkipAlreadyCompiled => "already-compiled",
            AdmissionOutcome::RejectClassNotCached => "class-not-cached",
            AdmissionOutcome::RejectMethodNotFound => "method-not-found",
        }
    }
}

/// Decide whether a request should be compiled. First matching rule wins:
///
/// 1. class metadata not in the shared cache → reject
/// 2. compiled code already cached → skip
/// 3. no resident method located → reject
/// 4. otherwise → proceed
pub fn admit(
    class_present: bool,
    already_compiled: bool,
    method: Option<&ResidentMethod>,
) -> AdmissionOutcome {
    if !class_present {
        AdmissionOutcome::RejectClassNotCached
    } else if already_compiled {
        AdmissionOutcome::SkipAlreadyCompiled
    } else if method.is_none() {
        AdmissionOutcome::RejectMethodNotFound
    } else {
        AdmissionOutcome::Proceed
    }
}
