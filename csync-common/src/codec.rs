//! Wire message definitions for the push protocol.
//!
//! Every frame on a [`crate::transport::Connection`] carries exactly one
//! [`Envelope`]. Payloads use prost's numbered-field binary encoding so that
//! peers running an older build skip fields they do not know about.
//!
//! The envelope repeats the payload kind in [`Envelope::kind`]; a frame whose
//! kind does not match its populated payload is a protocol violation and is
//! rejected by [`Envelope::decode_frame`].

use prost::Message;
use std::collections::BTreeMap;
use thiserror::Error;

/// Discriminant carried by every envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageKind {
    Unspecified = 0,
    PushRequest = 1,
    PushResponse = 2,
    AuthRequest = 3,
    AuthResponse = 4,
    VerificationProgress = 5,
    VerificationProgressResponse = 6,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::PushRequest => "PUSH_REQUEST",
            Self::PushResponse => "PUSH_RESPONSE",
            Self::AuthRequest => "AUTH_REQUEST",
            Self::AuthResponse => "AUTH_RESPONSE",
            Self::VerificationProgress => "VERIFICATION_PROGRESS",
            Self::VerificationProgressResponse => "VERIFICATION_PROGRESS_RESPONSE",
        };
        f.write_str(name)
    }
}

/// Lifecycle status reported for a push.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PushStatus {
    Pending = 0,
    InProgress = 1,
    Failed = 2,
    Completed = 3,
}

impl PushStatus {
    /// FAILED and COMPLETED end a push; the others are progress reports.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Completed)
    }
}

impl std::fmt::Display for PushStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Failed => "FAILED",
            Self::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Informational diff statistics produced by the editor-side tool.
#[derive(Clone, PartialEq, Message)]
pub struct DiffMetadata {
    #[prost(uint32, tag = "1")]
    pub files_changed: u32,
    #[prost(uint32, tag = "2")]
    pub additions: u32,
    #[prost(uint32, tag = "3")]
    pub deletions: u32,
}

/// A database branch switch that accompanied the push.
#[derive(Clone, PartialEq, Message)]
pub struct DatabaseBranchUpdate {
    #[prost(string, tag = "1")]
    pub database_name: String,
    #[prost(string, tag = "2")]
    pub previous_branch_id: String,
    #[prost(string, tag = "3")]
    pub new_branch_id: String,
    #[prost(bool, tag = "4")]
    pub branch_created: bool,
    #[prost(string, tag = "5")]
    pub parent_branch_id: String,
}

/// Full replacement set of environment variables.
///
/// Wrapped in its own message so that "absent" and "present but empty" stay
/// distinguishable on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct EnvironmentSet {
    #[prost(btree_map = "string, string", tag = "1")]
    pub variables: BTreeMap<String, String>,
}

impl EnvironmentSet {
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }
}

impl<K, V> FromIterator<(K, V)> for EnvironmentSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            variables: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct PushRequest {
    /// Sender-generated identifier, unique per push.
    #[prost(string, tag = "1")]
    pub push_id: String,
    /// Pre-computed rsync batch. May be empty.
    #[prost(bytes = "vec", tag = "2")]
    pub batch_file: Vec<u8>,
    /// Human-readable diff, informational only.
    #[prost(string, tag = "3")]
    pub code_diff: String,
    #[prost(string, tag = "4")]
    pub change_description: String,
    #[prost(message, optional, tag = "5")]
    pub diff_metadata: Option<DiffMetadata>,
    #[prost(message, repeated, tag = "6")]
    pub database_branch_updates: Vec<DatabaseBranchUpdate>,
    /// When present, replaces the whole environment set.
    #[prost(message, optional, tag = "7")]
    pub environment: Option<EnvironmentSet>,
}

impl PushRequest {
    pub fn new(push_id: impl Into<String>) -> Self {
        Self {
            push_id: push_id.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_batch(mut self, batch: Vec<u8>) -> Self {
        self.batch_file = batch;
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: EnvironmentSet) -> Self {
        self.environment = Some(environment);
        self
    }

    #[must_use]
    pub fn with_database_updates(mut self, updates: Vec<DatabaseBranchUpdate>) -> Self {
        self.database_branch_updates = updates;
        self
    }

    /// True when applying this request would touch neither files,
    /// environment nor database configuration.
    pub fn is_noop(&self) -> bool {
        self.batch_file.is_empty()
            && self.environment.is_none()
            && self.database_branch_updates.is_empty()
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct PushResponse {
    #[prost(string, tag = "1")]
    pub push_id: String,
    #[prost(enumeration = "PushStatus", tag = "2")]
    pub status: i32,
    /// Set iff the status is FAILED.
    #[prost(string, tag = "3")]
    pub error_message: String,
}

impl PushResponse {
    pub fn completed(push_id: impl Into<String>) -> Self {
        Self {
            push_id: push_id.into(),
            status: PushStatus::Completed as i32,
            error_message: String::new(),
        }
    }

    pub fn failed(push_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            push_id: push_id.into(),
            status: PushStatus::Failed as i32,
            error_message: error.into(),
        }
    }

    pub fn in_progress(push_id: impl Into<String>) -> Self {
        Self {
            push_id: push_id.into(),
            status: PushStatus::InProgress as i32,
            error_message: String::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// First-frame authentication for peers that cannot set upgrade headers.
#[derive(Clone, PartialEq, Message)]
pub struct AuthRequest {
    #[prost(string, tag = "1")]
    pub api_key: String,
    #[prost(string, tag = "2")]
    pub client_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AuthResponse {
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    #[prost(string, tag = "2")]
    pub reason: String,
}

/// Progress of post-push verification reported by the sidecar.
#[derive(Clone, PartialEq, Message)]
pub struct VerificationProgress {
    #[prost(string, tag = "1")]
    pub push_id: String,
    #[prost(string, tag = "2")]
    pub stage: String,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(uint32, tag = "4")]
    pub percent: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct VerificationProgressResponse {
    #[prost(string, tag = "1")]
    pub push_id: String,
    #[prost(bool, tag = "2")]
    pub acknowledged: bool,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "2")]
    PushRequest(PushRequest),
    #[prost(message, tag = "3")]
    PushResponse(PushResponse),
    #[prost(message, tag = "4")]
    AuthRequest(AuthRequest),
    #[prost(message, tag = "5")]
    AuthResponse(AuthResponse),
    #[prost(message, tag = "6")]
    VerificationProgress(VerificationProgress),
    #[prost(message, tag = "7")]
    VerificationProgressResponse(VerificationProgressResponse),
}

impl Payload {
    /// The kind an envelope must declare for this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::PushRequest(_) => MessageKind::PushRequest,
            Self::PushResponse(_) => MessageKind::PushResponse,
            Self::AuthRequest(_) => MessageKind::AuthRequest,
            Self::AuthResponse(_) => MessageKind::AuthResponse,
            Self::VerificationProgress(_) => MessageKind::VerificationProgress,
            Self::VerificationProgressResponse(_) => MessageKind::VerificationProgressResponse,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(enumeration = "MessageKind", tag = "1")]
    pub kind: i32,
    #[prost(oneof = "Payload", tags = "2, 3, 4, 5, 6, 7")]
    pub payload: Option<Payload>,
}

/// Errors raised while turning a frame into an [`Envelope`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unknown message kind {0}")]
    UnknownKind(i32),

    #[error("envelope of kind {0} carries no payload")]
    MissingPayload(MessageKind),

    #[error("envelope declares {declared} but carries {actual}")]
    KindMismatch {
        declared: MessageKind,
        actual: MessageKind,
    },
}

impl Envelope {
    /// Wrap a payload, deriving the kind from it.
    pub fn new(payload: Payload) -> Self {
        Self {
            kind: payload.kind() as i32,
            payload: Some(payload),
        }
    }

    pub fn push_request(request: PushRequest) -> Self {
        Self::new(Payload::PushRequest(request))
    }

    pub fn push_response(response: PushResponse) -> Self {
        Self::new(Payload::PushResponse(response))
    }

    pub fn auth_request(api_key: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self::new(Payload::AuthRequest(AuthRequest {
            api_key: api_key.into(),
            client_name: client_name.into(),
        }))
    }

    pub fn auth_response(accepted: bool, reason: impl Into<String>) -> Self {
        Self::new(Payload::AuthResponse(AuthResponse {
            accepted,
            reason: reason.into(),
        }))
    }

    /// Serialize to a binary frame.
    pub fn encode_frame(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Parse and validate a binary frame.
    pub fn decode_frame(bytes: &[u8]) -> Result<Self, CodecError> {
        let envelope = Self::decode(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Check that the declared kind is known and agrees with the payload.
    pub fn validate(&self) -> Result<(), CodecError> {
        let declared =
            MessageKind::try_from(self.kind).map_err(|_| CodecError::UnknownKind(self.kind))?;
        if declared == MessageKind::Unspecified {
            return Err(CodecError::UnknownKind(self.kind));
        }
        let payload = self
            .payload
            .as_ref()
            .ok_or(CodecError::MissingPayload(declared))?;
        let actual = payload.kind();
        if actual != declared {
            return Err(CodecError::KindMismatch { declared, actual });
        }
        Ok(())
    }

    /// The push id this envelope refers to, if its payload carries one.
    pub fn push_id(&self) -> Option<&str> {
        match self.payload.as_ref()? {
            Payload::PushRequest(r) => Some(&r.push_id),
            Payload::PushResponse(r) => Some(&r.push_id),
            Payload::VerificationProgress(r) => Some(&r.push_id),
            Payload::VerificationProgressResponse(r) => Some(&r.push_id),
            Payload::AuthRequest(_) | Payload::AuthResponse(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> PushRequest {
        PushRequest {
            push_id: "p1".to_string(),
            batch_file: vec![7u8; 32],
            code_diff: "--- a/app.py\n+++ b/app.py".to_string(),
            change_description: "tweak handler".to_string(),
            diff_metadata: Some(DiffMetadata {
                files_changed: 1,
                additions: 3,
                deletions: 1,
            }),
            database_branch_updates: vec![DatabaseBranchUpdate {
                database_name: "main".to_string(),
                previous_branch_id: "br-1".to_string(),
                new_branch_id: "br-2".to_string(),
                branch_created: true,
                parent_branch_id: "br-1".to_string(),
            }],
            environment: Some([("FOO", "bar baz")].into_iter().collect()),
        }
    }

    #[test]
    fn test_push_request_survives_frame_encoding() {
        let envelope = Envelope::push_request(sample_request());
        let decoded = Envelope::decode_frame(&envelope.encode_frame()).unwrap();

        assert_eq!(decoded.kind(), MessageKind::PushRequest);
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.push_id(), Some("p1"));
    }

    #[test]
    fn test_empty_environment_is_distinct_from_absent() {
        let with_empty = PushRequest::new("p").with_environment(EnvironmentSet::default());
        let without = PushRequest::new("p");

        let decoded_empty =
            Envelope::decode_frame(&Envelope::push_request(with_empty).encode_frame()).unwrap();
        let decoded_absent =
            Envelope::decode_frame(&Envelope::push_request(without).encode_frame()).unwrap();

        match (decoded_empty.payload, decoded_absent.payload) {
            (Some(Payload::PushRequest(a)), Some(Payload::PushRequest(b))) => {
                assert_eq!(a.environment, Some(EnvironmentSet::default()));
                assert_eq!(b.environment, None);
            }
            other => panic!("unexpected payloads: {other:?}"),
        }
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let mut envelope = Envelope::push_response(PushResponse::completed("p1"));
        envelope.kind = MessageKind::PushRequest as i32;

        let err = Envelope::decode_frame(&envelope.encode_to_vec()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::KindMismatch {
                declared: MessageKind::PushRequest,
                actual: MessageKind::PushResponse
            }
        ));
    }

    #[test]
    fn test_missing_payload_is_rejected() {
        let envelope = Envelope {
            kind: MessageKind::PushRequest as i32,
            payload: None,
        };
        let err = Envelope::decode_frame(&envelope.encode_to_vec()).unwrap_err();
        assert!(matches!(err, CodecError::MissingPayload(MessageKind::PushRequest)));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let envelope = Envelope {
            kind: 42,
            payload: Some(Payload::PushResponse(PushResponse::completed("p"))),
        };
        let err = Envelope::decode_frame(&envelope.encode_to_vec()).unwrap_err();
        assert!(matches!(err, CodecError::UnknownKind(42)));

        let unspecified = Envelope {
            kind: 0,
            payload: Some(Payload::PushResponse(PushResponse::completed("p"))),
        };
        assert!(Envelope::decode_frame(&unspecified.encode_to_vec()).is_err());
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let err = Envelope::decode_frame(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let mut bytes = Envelope::push_response(PushResponse::completed("p9")).encode_frame();
        // Field 15, wire type 2 (length-delimited), 3 bytes of payload.
        bytes.extend_from_slice(&[(15 << 3) | 2, 3, b'n', b'e', b'w']);

        let decoded = Envelope::decode_frame(&bytes).unwrap();
        assert_eq!(decoded.push_id(), Some("p9"));
    }

    #[test]
    fn test_push_response_constructors() {
        let done = PushResponse::completed("a");
        assert_eq!(done.status(), PushStatus::Completed);
        assert!(done.error_message.is_empty());
        assert!(done.is_terminal());

        let failed = PushResponse::failed("b", "rsync exited with status 23");
        assert_eq!(failed.status(), PushStatus::Failed);
        assert_eq!(failed.error_message, "rsync exited with status 23");
        assert!(failed.is_terminal());

        assert!(!PushResponse::in_progress("c").is_terminal());
    }

    #[test]
    fn test_is_noop() {
        assert!(PushRequest::new("x").is_noop());
        assert!(!PushRequest::new("x").with_batch(vec![1]).is_noop());
        assert!(
            !PushRequest::new("x")
                .with_environment(EnvironmentSet::default())
                .is_noop()
        );
        assert!(
            !PushRequest::new("x")
                .with_database_updates(vec![DatabaseBranchUpdate::default()])
                .is_noop()
        );
    }

    #[test]
    fn test_kind_display_uses_wire_names() {
        assert_eq!(MessageKind::PushRequest.to_string(), "PUSH_REQUEST");
        assert_eq!(
            MessageKind::VerificationProgressResponse.to_string(),
            "VERIFICATION_PROGRESS_RESPONSE"
        );
        assert_eq!(PushStatus::InProgress.to_string(), "IN_PROGRESS");
    }
}
