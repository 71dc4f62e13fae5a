//! JSON shapes exchanged with the signed key request authority, and the
//! validated records built from them.
//!
//! Responses are parsed into all-optional raw structs first; validation into
//! [`ProvisioningToken`] and [`SignerRecord`] happens here, at the boundary.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Body of `POST /v2/signed-key-requests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignedKeyRequest {
    pub key: String,
    pub name: String,
    pub request_fid: u64,
    pub deadline: u64,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerState {
    Pending,
    Approved,
    Completed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerUser {
    pub fid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// `signedKeyRequest` object as the authority sends it. Every field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSignedKeyRequest {
    pub token: Option<String>,
    pub deeplink_url: Option<String>,
    pub key: Option<String>,
    pub request_fid: Option<u64>,
    pub state: Option<SignerState>,
    pub user_fid: Option<u64>,
    pub signer_user: Option<SignerUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeResult {
    pub signed_key_request: Option<RawSignedKeyRequest>,
}

/// `{ result: { signedKeyRequest: { .. } } }`, shared by both endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    pub result: Option<EnvelopeResult>,
}

impl Envelope {
    pub fn into_request(self) -> Option<RawSignedKeyRequest> {
        self.result.and_then(|r| r.signed_key_request)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Error body, `{ errors: [{ message }] }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<ErrorMessage>,
}

impl ErrorEnvelope {
    pub fn joined(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Handle for one provisioning attempt. The deep link goes to the approving app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningToken {
    pub token: String,
    pub deep_link_url: String,
}

impl TryFrom<RawSignedKeyRequest> for ProvisioningToken {
    type Error = Error;

    fn try_from(raw: RawSignedKeyRequest) -> Result<Self> {
        let token = raw
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::rejected("response is missing `token`"))?;
        let deep_link_url = raw
            .deeplink_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::rejected("response is missing `deeplinkUrl`"))?;
        Ok(Self {
            token,
            deep_link_url,
        })
    }
}

/// The approved signer, persisted once `state` is `completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerRecord {
    pub token: String,
    pub deeplink_url: String,
    pub key: String,
    pub request_fid: u64,
    pub state: SignerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_fid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_user: Option<SignerUser>,
}

impl SignerRecord {
    pub fn is_completed(&self) -> bool {
        self.state == SignerState::Completed
    }

    /// FID the signer acts for, when the authority reported it.
    pub fn user_fid(&self) -> Option<u64> {
        self.user_fid.or(self.signer_user.as_ref().map(|u| u.fid))
    }
}

/// Result of one status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not completed yet. `None` when the response carried no usable state.
    Pending(Option<SignerState>),
    Completed(SignerRecord),
}

impl PollOutcome {
    /// Classifies a status response for `token`. Missing fields never fail;
    /// they keep the request pending.
    pub fn classify(envelope: Envelope, token: &ProvisioningToken) -> Self {
        let Some(raw) = envelope.into_request() else {
            return PollOutcome::Pending(None);
        };
        match raw.state {
            Some(SignerState::Completed) => {}
            state => return PollOutcome::Pending(state),
        }
        let (Some(key), Some(request_fid)) = (raw.key, raw.request_fid) else {
            return PollOutcome::Pending(None);
        };
        PollOutcome::Completed(SignerRecord {
            token: raw.token.unwrap_or_else(|| token.token.clone()),
            deeplink_url: raw
                .deeplink_url
                .unwrap_or_else(|| token.deep_link_url.clone()),
            key,
            request_fid,
            state: SignerState::Completed,
            user_fid: raw.user_fid,
            signer_user: raw.signer_user,
        })
    }
}
