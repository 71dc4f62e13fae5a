//! Remote authority seam and the one-shot submission of a signed key request.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};
use url::Url;

use crate::authorization::Authorization;
use crate::config::AuthorityConfig;
use crate::error::{Error, Result};
use crate::wire::{CreateSignedKeyRequest, Envelope, ErrorEnvelope, ProvisioningToken};

const CREATE_PATH: &str = "v2/signed-key-requests";
const STATUS_PATH: &str = "v2/signed-key-request";

/// The signed key request authority.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Creates a signed key request. Exactly one network call.
    async fn create_signed_key_request(&self, body: &CreateSignedKeyRequest) -> Result<Envelope>;

    /// Reads the current state of a request. Side-effect free.
    ///
    /// A response that is not a valid envelope must come back as
    /// `Ok(Envelope::default())`, not as an error.
    async fn signed_key_request_status(&self, token: &str) -> Result<Envelope>;
}

/// [`Authority`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpAuthority {
    pub fn new(config: &AuthorityConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::rejected(format!("invalid authority URL: {e}")))
    }
}

fn rejection(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.joined())
        .unwrap_or_else(|| body.trim().to_string());
    Error::RemoteRejected {
        status: Some(status.as_u16()),
        message,
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn create_signed_key_request(&self, body: &CreateSignedKeyRequest) -> Result<Envelope> {
        let url = self.endpoint(CREATE_PATH)?;
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(rejection(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::rejected(format!("malformed response envelope: {e}")))
    }

    async fn signed_key_request_status(&self, token: &str) -> Result<Envelope> {
        let mut url = self.endpoint(STATUS_PATH)?;
        url.query_pairs_mut().append_pair("token", token);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            debug!(%status, "status endpoint returned an error, treating as pending");
            return Ok(Envelope::default());
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("malformed status response: {e}");
            Envelope::default()
        }))
    }
}

fn mentions_expiry(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("deadline") || message.contains("expired")
}

/// Submits signed authorizations. Never retries: a resubmission could bind a
/// token to an authorization whose deadline has already passed.
pub struct ProvisioningClient<'a> {
    authority: &'a dyn Authority,
}

impl<'a> ProvisioningClient<'a> {
    pub fn new(authority: &'a dyn Authority) -> Self {
        Self { authority }
    }

    pub async fn submit(&self, name: &str, authorization: &Authorization) -> Result<ProvisioningToken> {
        let body = CreateSignedKeyRequest {
            key: authorization.key.to_hex(),
            name: name.to_string(),
            request_fid: authorization.request_fid,
            deadline: authorization.deadline,
            signature: authorization.signature_hex(),
        };

        let envelope = self
            .authority
            .create_signed_key_request(&body)
            .await
            .map_err(|e| match e {
                Error::RemoteRejected { ref message, .. } if mentions_expiry(message) => {
                    Error::DeadlineExpired {
                        deadline: authorization.deadline,
                    }
                }
                e => e,
            })?;

        let raw = envelope
            .into_request()
            .ok_or_else(|| Error::rejected("response is missing `result.signedKeyRequest`"))?;
        let token = ProvisioningToken::try_from(raw)?;
        info!(name, key = %authorization.key, "signed key request created");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::authorization::tests::params;
    use crate::authorization::{unix_now, AuthorizationSigner};
    use crate::vault::KeyVault;

    struct Canned {
        reply: Mutex<Option<Result<Envelope>>>,
        seen: Mutex<Vec<CreateSignedKeyRequest>>,
    }

    impl Canned {
        fn new(reply: Result<Envelope>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Authority for Canned {
        async fn create_signed_key_request(&self, body: &CreateSignedKeyRequest) -> Result<Envelope> {
            self.seen.lock().unwrap().push(body.clone());
            self.reply.lock().unwrap().take().unwrap()
        }

        async fn signed_key_request_status(&self, _token: &str) -> Result<Envelope> {
            unreachable!()
        }
    }

    fn authorization() -> Authorization {
        let pair = KeyVault.generate();
        AuthorizationSigner
            .sign(&params(unix_now() + 600), &pair.public)
            .unwrap()
    }

    #[tokio::test]
    async fn submit_returns_token_and_sends_public_material_only() {
        let envelope = serde_json::from_str(
            r#"{"result":{"signedKeyRequest":{"token":"tok1","deeplinkUrl":"farcaster://tok1","state":"pending"}}}"#,
        )
        .unwrap();
        let authority = Canned::new(Ok(envelope));
        let auth = authorization();

        let token = ProvisioningClient::new(&authority)
            .submit("Example", &auth)
            .await
            .unwrap();
        assert_eq!(token.token, "tok1");
        assert_eq!(token.deep_link_url, "farcaster://tok1");

        let seen = authority.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, auth.key.to_hex());
        assert_eq!(seen[0].request_fid, 10626);
        assert_eq!(seen[0].signature, auth.signature_hex());
    }

    #[tokio::test]
    async fn empty_envelope_is_rejected() {
        let authority = Canned::new(Ok(Envelope::default()));
        let err = ProvisioningClient::new(&authority)
            .submit("Example", &authorization())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { .. }));
    }

    #[tokio::test]
    async fn expiry_rejection_is_distinct() {
        let authority = Canned::new(Err(Error::RemoteRejected {
            status: Some(400),
            message: "Deadline has passed".into(),
        }));
        let err = ProvisioningClient::new(&authority)
            .submit("Example", &authorization())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExpired { .. }));
    }

    #[test]
    fn rejection_prefers_error_messages() {
        let err = rejection(StatusCode::BAD_REQUEST, r#"{"errors":[{"message":"invalid signature"}]}"#);
        assert_eq!(
            err.to_string(),
            "remote authority rejected the request (400): invalid signature"
        );
        let err = rejection(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert!(err.to_string().ends_with("upstream down"));
    }
}
