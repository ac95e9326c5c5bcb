/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Request id based trace sampling.
//!
//! Request ids are text UUIDs. The character at offset 14, which is the
//! UUID version digit, is reused to record the trace status of the request.

const UUID_LENGTH: usize = 36;
const TRACE_BYTE_POSITION: usize = 14;

const TRACE_NONE: u8 = b'4';
const TRACE_SAMPLED: u8 = b'9';
const TRACE_CLIENT: u8 = b'a';
const TRACE_FORCED: u8 = b'b';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UuidTraceStatus {
    NoTrace,
    Sampled,
    Client,
    Forced,
}

impl UuidTraceStatus {
    fn as_byte(&self) -> u8 {
        match self {
            UuidTraceStatus::NoTrace => TRACE_NONE,
            UuidTraceStatus::Sampled => TRACE_SAMPLED,
            UuidTraceStatus::Client => TRACE_CLIENT,
            UuidTraceStatus::Forced => TRACE_FORCED,
        }
    }

    pub fn from_request_id(request_id: &str) -> Self {
        if request_id.len() != UUID_LENGTH {
            return UuidTraceStatus::NoTrace;
        }
        match request_id.as_bytes()[TRACE_BYTE_POSITION] {
            TRACE_SAMPLED => UuidTraceStatus::Sampled,
            TRACE_CLIENT => UuidTraceStatus::Client,
            TRACE_FORCED => UuidTraceStatus::Forced,
            _ => UuidTraceStatus::NoTrace,
        }
    }

    /// Returns false if `request_id` is not an uuid string.
    pub fn apply(&self, request_id: &mut String) -> bool {
        if request_id.len() != UUID_LENGTH || !request_id.is_ascii() {
            return false;
        }
        let mut buf = [0u8; 4];
        let s = (self.as_byte() as char).encode_utf8(&mut buf);
        request_id.replace_range(TRACE_BYTE_POSITION..TRACE_BYTE_POSITION + 1, s);
        true
    }
}

/// Parse the leading 8 hex digits of an uuid and return the value mod `m`.
pub fn uuid_mod_by(request_id: &str, m: u64) -> Option<u64> {
    if request_id.len() != UUID_LENGTH || m == 0 {
        return None;
    }
    let head = request_id.get(0..8)?;
    if !head.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let v = u64::from_str_radix(head, 16).ok()?;
    Some(v % m)
}

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceReason {
    HealthCheck,
    NotTraceableRequestId,
    ClientForced,
    ServiceForced,
    Sampling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceDecision {
    pub reason: TraceReason,
    pub traced: bool,
}

/// Trace decision point called by filter chains for each request.
pub trait TraceMutator: Send + Sync {
    /// Mark the request id as traced or not.
    fn mutate_request_id(
        &self,
        request_id: &mut String,
        has_client_trace_id: bool,
        force_trace: bool,
    );

    fn is_tracing(&self, health_check: bool, request_id: Option<&str>) -> TraceDecision;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TracingConfig {
    /// percentage of requests with a client trace id that are traced
    pub client_enabled: u32,
    /// requests sampled out of 10000
    pub random_sampling: u32,
    /// percentage of requests allowed to be traced at all
    pub global_enabled: u32,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            client_enabled: 100,
            random_sampling: 10000,
            global_enabled: 100,
        }
    }
}

pub struct UuidTraceMutator {
    config: TracingConfig,
}

impl UuidTraceMutator {
    pub fn new(config: TracingConfig) -> Self {
        UuidTraceMutator { config }
    }

    fn client_enabled(&self) -> bool {
        fastrand::u32(0..100) < self.config.client_enabled
    }
}

impl TraceMutator for UuidTraceMutator {
    fn mutate_request_id(
        &self,
        request_id: &mut String,
        has_client_trace_id: bool,
        force_trace: bool,
    ) {
        let Some(result) = uuid_mod_by(request_id, 10000) else {
            return;
        };

        if UuidTraceStatus::from_request_id(request_id) == UuidTraceStatus::NoTrace {
            if has_client_trace_id && self.client_enabled() {
                UuidTraceStatus::Client.apply(request_id);
            } else if force_trace {
                UuidTraceStatus::Forced.apply(request_id);
            } else if result < u64::from(self.config.random_sampling) {
                UuidTraceStatus::Sampled.apply(request_id);
            }
        }

        if result % 100 >= u64::from(self.config.global_enabled) {
            UuidTraceStatus::NoTrace.apply(request_id);
        }
    }

    fn is_tracing(&self, health_check: bool, request_id: Option<&str>) -> TraceDecision {
        if health_check {
            return TraceDecision {
                reason: TraceReason::HealthCheck,
                traced: false,
            };
        }
        let Some(request_id) = request_id else {
            return TraceDecision {
                reason: TraceReason::NotTraceableRequestId,
                traced: false,
            };
        };

        let (reason, traced) = match UuidTraceStatus::from_request_id(request_id) {
            UuidTraceStatus::Client => (TraceReason::ClientForced, true),
            UuidTraceStatus::Forced => (TraceReason::ServiceForced, true),
            UuidTraceStatus::Sampled => (TraceReason::Sampling, true),
            UuidTraceStatus::NoTrace => (TraceReason::NotTraceableRequestId, false),
        };
        TraceDecision { reason, traced }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "00000064-6e7a-4d1c-b0b5-3b8a5f0e6a43";

    fn mutator(client: u32, sampling: u32, global: u32) -> UuidTraceMutator {
        UuidTraceMutator::new(TracingConfig {
            client_enabled: client,
            random_sampling: sampling,
            global_enabled: global,
        })
    }

    #[test]
    fn status() {
        let mut id = ID.to_string();
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::NoTrace);
        assert!(UuidTraceStatus::Forced.apply(&mut id));
        assert_eq!(&id[14..15], "b");
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::Forced);

        let mut bad = "not-an-uuid".to_string();
        assert!(!UuidTraceStatus::Sampled.apply(&mut bad));
        assert_eq!(bad, "not-an-uuid");
    }

    #[test]
    fn mod_by() {
        assert_eq!(uuid_mod_by(ID, 10000), Some(100));
        assert_eq!(uuid_mod_by("abc", 10000), None);
        assert_eq!(uuid_mod_by("zzzzzzzz-6e7a-4d1c-b0b5-3b8a5f0e6a43", 100), None);
        assert_eq!(uuid_mod_by("+1234567-6e7a-4d1c-b0b5-3b8a5f0e6a43", 100), None);
    }

    #[test]
    fn client_then_forced_then_sampled() {
        let m = mutator(100, 0, 100);
        let mut id = ID.to_string();
        m.mutate_request_id(&mut id, true, true);
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::Client);

        let mut id = ID.to_string();
        m.mutate_request_id(&mut id, false, true);
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::Forced);

        let mut id = ID.to_string();
        m.mutate_request_id(&mut id, false, false);
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::NoTrace);

        let m = mutator(0, 101, 100);
        let mut id = ID.to_string();
        m.mutate_request_id(&mut id, true, false);
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::Sampled);
    }

    #[test]
    fn already_traced() {
        let m = mutator(100, 10000, 100);
        let mut id = ID.to_string();
        UuidTraceStatus::Forced.apply(&mut id);
        m.mutate_request_id(&mut id, true, false);
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::Forced);
    }

    #[test]
    fn global_disabled() {
        let m = mutator(100, 10000, 0);
        let mut id = ID.to_string();
        m.mutate_request_id(&mut id, false, true);
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::NoTrace);
    }

    #[test]
    fn corrupted_id_untouched() {
        let m = mutator(100, 10000, 100);
        let mut id = "corrupted".to_string();
        m.mutate_request_id(&mut id, true, true);
        assert_eq!(id, "corrupted");
    }

    #[test]
    fn decision() {
        let m = mutator(100, 10000, 100);
        assert_eq!(
            m.is_tracing(true, Some(ID)),
            TraceDecision {
                reason: TraceReason::HealthCheck,
                traced: false
            }
        );
        assert_eq!(
            m.is_tracing(false, None).reason,
            TraceReason::NotTraceableRequestId
        );
        assert!(!m.is_tracing(false, Some(ID)).traced);

        let mut id = ID.to_string();
        UuidTraceStatus::Sampled.apply(&mut id);
        assert_eq!(
            m.is_tracing(false, Some(&id)),
            TraceDecision {
                reason: TraceReason::Sampling,
                traced: true
            }
        );
        UuidTraceStatus::Client.apply(&mut id);
        assert_eq!(m.is_tracing(false, Some(&id)).reason, TraceReason::ClientForced);
    }

    #[test]
    fn new_id_not_traced() {
        let id = new_request_id();
        assert_eq!(id.len(), 36);
        assert_eq!(UuidTraceStatus::from_request_id(&id), UuidTraceStatus::NoTrace);
    }
}
