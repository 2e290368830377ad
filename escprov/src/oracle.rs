//! Signature issuance by the licensing service.
//!
//! The service binds one signature to one (unique ID, product) pair and is
//! idempotent: asking again for the same pair returns the signature issued the
//! first time, flagged as not new.

use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Default licensing API endpoint.
pub const DEFAULT_LICENSING_URL: &str = "https://licensing.zubax.com/api/v1";

/// Timeout for licensing API requests.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// A signature handed out by the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureIssuance {
    /// Raw signature bytes.
    pub signature: Vec<u8>,
    /// `true` if generated by this request, `false` if issued before.
    pub newly_generated: bool,
}

/// Source of signatures.
pub trait SigningOracle {
    /// Get the signature for `unique_id` of a `product` unit.
    fn issue(&self, unique_id: &[u8], product: &str) -> Result<SignatureIssuance>;
}

impl<T: SigningOracle + ?Sized> SigningOracle for &T {
    fn issue(&self, unique_id: &[u8], product: &str) -> Result<SignatureIssuance> {
        (**self).issue(unique_id, product)
    }
}

/// Operator credentials for the licensing API.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Account name.
    pub user: String,
    /// Account password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SignatureRequest<'a> {
    unique_id: String,
    product_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignatureResponse {
    signature: String,
    new: bool,
}

/// HTTP JSON client of the licensing service.
pub struct LicensingClient {
    client: reqwest::blocking::Client,
    base_url: String,
    credentials: Credentials,
}

impl LicensingClient {
    /// Client for the API at `base_url`.
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(API_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url, credentials))
    }

    /// Client using a preconfigured HTTP client.
    pub fn with_client(
        client: reqwest::blocking::Client,
        base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            client,
            base_url: base_url
                .into()
                .trim_end_matches('/')
                .to_string(),
            credentials,
        }
    }

    /// API endpoint.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl SigningOracle for LicensingClient {
    fn issue(&self, unique_id: &[u8], product: &str) -> Result<SignatureIssuance> {
        let url = format!("{}/signature/generate", self.base_url);
        debug!("Requesting signature for {} from {url}", hex::encode(unique_id));

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .json(&SignatureRequest {
                unique_id: STANDARD.encode(unique_id),
                product_name: product,
            })
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(Error::Protocol(format!(
                "licensing API returned {status}: {}",
                text.trim()
            )));
        }

        let body: SignatureResponse = resp
            .json()
            .map_err(|e| Error::Protocol(format!("malformed licensing API response: {e}")))?;
        let signature = STANDARD.decode(body.signature.trim())?;
        if signature.is_empty() {
            return Err(Error::Protocol("licensing API returned an empty signature".into()));
        }
        Ok(SignatureIssuance {
            signature,
            newly_generated: body.new,
        })
    }
}

/// Oracle keeping issued signatures in memory.
///
/// Signatures are derived deterministically from the product and unique ID.
/// Meant for bench testing without access to the licensing service.
#[derive(Debug, Default)]
pub struct MemoryOracle {
    issued: Mutex<HashMap<(Vec<u8>, String), Vec<u8>>>,
}

impl MemoryOracle {
    /// Empty oracle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of signatures issued so far.
    pub fn issued_count(&self) -> usize {
        self.issued
            .lock()
            .map(|m| m.len())
            .unwrap_or_default()
    }
}

impl SigningOracle for MemoryOracle {
    fn issue(&self, unique_id: &[u8], product: &str) -> Result<SignatureIssuance> {
        if unique_id.is_empty() {
            return Err(Error::Protocol("empty unique ID".into()));
        }
        let mut issued = self
            .issued
            .lock()
            .map_err(|_| Error::Protocol("signature store is poisoned".into()))?;

        let key = (unique_id.to_vec(), product.to_string());
        if let Some(signature) = issued.get(&key) {
            debug!("Signature for {} was issued before", hex::encode(unique_id));
            return Ok(SignatureIssuance {
                signature: signature.clone(),
                newly_generated: false,
            });
        }

        let signature = derive_signature(unique_id, product);
        issued.insert(key, signature.clone());
        Ok(SignatureIssuance {
            signature,
            newly_generated: true,
        })
    }
}

/// SHA-512 over the product name, a NUL separator and the unique ID.
fn derive_signature(unique_id: &[u8], product: &str) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(product.as_bytes());
    hasher.update([0u8]);
    hasher.update(unique_id);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    const UID: [u8; 16] = [0xDE, 0xAD, 0xBE, 0xEF, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

    /// Answer one HTTP request with `status` and `body`; the request is sent
    /// back through the returned channel.
    fn serve_once(status: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
                if line.trim().is_empty() {
                    break;
                }
                head.push_str(&line);
            }
            let mut payload = vec![0u8; content_length];
            reader.read_exact(&mut payload).unwrap();
            head.push_str(&String::from_utf8_lossy(&payload));
            tx.send(head).unwrap();

            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
        });
        (format!("http://{addr}/api/"), rx)
    }

    fn client(base: String) -> LicensingClient {
        let http = reqwest::blocking::Client::builder()
            .no_proxy()
            .build()
            .unwrap();
        LicensingClient::with_client(http, base, Credentials {
            user: "operator".into(),
            password: "secret".into(),
        })
    }

    #[test]
    fn test_memory_oracle_is_idempotent() {
        let oracle = MemoryOracle::new();
        let first = oracle.issue(&UID, "io.px4.sapog").unwrap();
        let second = oracle.issue(&UID, "io.px4.sapog").unwrap();

        assert!(first.newly_generated);
        assert!(!second.newly_generated);
        assert_eq!(first.signature, second.signature);
        assert_eq!(oracle.issued_count(), 1);
    }

    #[test]
    fn test_memory_oracle_binds_product_and_id() {
        let oracle = MemoryOracle::new();
        let a = oracle.issue(&UID, "io.px4.sapog").unwrap();
        let b = oracle.issue(&UID, "com.zubax.orel").unwrap();
        let mut other = UID;
        other[15] ^= 1;
        let c = oracle.issue(&other, "io.px4.sapog").unwrap();

        assert_ne!(a.signature, b.signature);
        assert_ne!(a.signature, c.signature);
        assert_eq!(a.signature.len(), 64);
    }

    #[test]
    fn test_licensing_client_request_and_response() {
        let (base, requests) = serve_once("200 OK", r#"{"signature": "c2lnbmF0dXJl", "new": true}"#);
        let issuance = client(base).issue(&UID, "io.px4.sapog").unwrap();

        assert_eq!(issuance.signature, b"signature");
        assert!(issuance.newly_generated);

        let request = requests.recv().unwrap();
        assert!(request.starts_with("POST /api/signature/generate"));
        assert!(request.to_ascii_lowercase().contains("authorization: basic"));
        assert!(request.contains(r#""unique_id":"3q2+7wABAgMEBQYHCAkKCw==""#));
        assert!(request.contains(r#""product_name":"io.px4.sapog""#));
    }

    #[test]
    fn test_memory_oracle_signature_is_sha512_of_product_and_id() {
        let issued = MemoryOracle::new().issue(&UID, "io.px4.sapog").unwrap();

        let mut hasher = Sha512::new();
        hasher.update(b"io.px4.sapog\0");
        hasher.update(UID);
        assert_eq!(issued.signature, hasher.finalize().to_vec());
    }

    #[test]
    fn test_licensing_reply_without_new_flag_is_protocol_error() {
        let (base, _requests) = serve_once("200 OK", r#"{"signature": "c2lnbmF0dXJl"}"#);
        let err = client(base).issue(&UID, "io.px4.sapog").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_licensing_client_rejection_is_protocol_error() {
        let (base, _requests) = serve_once("401 Unauthorized", r#"{"error": "bad credentials"}"#);
        let err = client(base).issue(&UID, "io.px4.sapog").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_licensing_client_bad_signature_encoding() {
        let (base, _requests) = serve_once("200 OK", r#"{"signature": "***", "new": false}"#);
        assert!(matches!(
            client(base).issue(&UID, "io.px4.sapog"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            user: "operator".into(),
            password: "secret".into(),
        };
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
