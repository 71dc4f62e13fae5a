use std::fmt;

use thiserror::Error;

use crate::store::ClientName;

/// Failures raised by the individual provisioning components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("invalid client name: {0}")]
    InvalidClientName(String),

    #[error("invalid app mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("invalid EIP-712 typed data: {0}")]
    TypedData(String),

    /// The authorization deadline passed, either before signing or as reported by the authority.
    #[error("authorization deadline {deadline} has expired")]
    DeadlineExpired { deadline: u64 },

    #[error("remote authority rejected the request{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    RemoteRejected { status: Option<u16>, message: String },

    #[error("transport error: {0}")]
    TransportError(#[from] reqwest::Error),

    #[error("provisioning timed out or was cancelled while waiting for approval")]
    ProvisioningTimedOut,

    #[error("corrupt persisted state under {key}: {reason}")]
    CorruptPersistedState { key: String, reason: String },

    #[error("a provisioning flow is already running for this client")]
    AlreadyInProgress,

    #[error("storage backend failure: {0}")]
    Storage(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Error::RemoteRejected {
            status: None,
            message: message.into(),
        }
    }

    /// Whether a retry with the same inputs can ever succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransportError(_))
    }
}

/// The point in the flow where a [`FlowError`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Key,
    Authorize,
    Submit,
    Approval,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Key => "key",
            Stage::Authorize => "authorize",
            Stage::Submit => "submit",
            Stage::Approval => "approval",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// An [`Error`] annotated with the client identity and stage it occurred in.
#[derive(Debug, Error)]
#[error("provisioning `{client_name}` failed at {stage}: {source}")]
pub struct FlowError {
    pub client_name: ClientName,
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl FlowError {
    pub fn kind(&self) -> &Error {
        &self.source
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attaches flow context to component errors.
pub(crate) trait WithStage<T> {
    fn at(self, client_name: &ClientName, stage: Stage) -> Result<T, FlowError>;
}

impl<T> WithStage<T> for Result<T> {
    fn at(self, client_name: &ClientName, stage: Stage) -> Result<T, FlowError> {
        self.map_err(|source| FlowError {
            client_name: client_name.clone(),
            stage,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_error_names_client_and_stage() {
        let err: Result<(), FlowError> =
            Err(Error::ProvisioningTimedOut).at(&ClientName::new("Example").unwrap(), Stage::Approval);
        let msg = format!("{}", err.unwrap_err());
        assert!(msg.contains("`Example`"));
        assert!(msg.contains("at approval"));
    }

    #[test]
    fn rejection_message_includes_status() {
        let err = Error::RemoteRejected {
            status: Some(400),
            message: "bad signature".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote authority rejected the request (400): bad signature"
        );
        assert_eq!(
            Error::rejected("malformed").to_string(),
            "remote authority rejected the request: malformed"
        );
    }
}
