//! Mutual challenge/response authentication run at the start of every RPC connection.
//!
//! The server opens with a random nonce. The client answers with an HMAC-SHA256 over that
//! nonce plus a nonce of its own, and the server proves itself by signing the client nonce.
//! The secret never crosses the wire and no request is read before both sides are verified.

use super::secret::SharedSecret;
use crate::rpc::protocol::{read_frame, write_frame};
use crate::rpc::types::RpcError;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncWrite};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 32;

/// Frames exchanged during the handshake. Byte fields are hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    /// Server nonce.
    Challenge {
        /// Random bytes the client must sign.
        nonce: String,
    },
    /// Client proof plus the client's own challenge.
    Answer {
        /// HMAC over the server nonce.
        digest: String,
        /// Random bytes the server must sign.
        nonce: String,
    },
    /// Server proof; the connection is authenticated.
    Accepted {
        /// HMAC over the client nonce.
        digest: String,
    },
    /// The client's proof did not verify.
    Rejected {
        /// Reason shown to the client.
        reason: String,
    },
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

fn sign(secret: &SharedSecret, nonce: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key size is always valid");
    mac.update(nonce);
    mac.finalize().into_bytes().to_vec()
}

fn verify(secret: &SharedSecret, nonce: &[u8], digest_hex: &str) -> bool {
    let Ok(digest) = hex::decode(digest_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key size is always valid");
    mac.update(nonce);
    mac.verify_slice(&digest).is_ok()
}

async fn expect_message<S>(stream: &mut S) -> Result<HandshakeMessage, RpcError>
where
    S: AsyncRead + Unpin,
{
    read_frame(stream).await?.ok_or(RpcError::ConnectionClosed)
}

/// Authenticate an incoming connection on the server side.
pub async fn accept<S>(stream: &mut S, secret: &SharedSecret) -> Result<(), RpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge = generate_nonce();
    write_frame(
        stream,
        &HandshakeMessage::Challenge {
            nonce: hex::encode(challenge),
        },
    )
    .await?;

    let (digest, client_nonce) = match expect_message(stream).await? {
        HandshakeMessage::Answer { digest, nonce } => (digest, nonce),
        other => {
            return Err(RpcError::Protocol(format!(
                "expected handshake answer, got {other:?}"
            )));
        }
    };

    if !verify(secret, &challenge, &digest) {
        let rejected = HandshakeMessage::Rejected {
            reason: "authentication failed".into(),
        };
        // Best effort: the peer may already be gone.
        let _ = write_frame(stream, &rejected).await;
        return Err(RpcError::AuthenticationMismatch);
    }

    let client_nonce = hex::decode(client_nonce)
        .map_err(|err| RpcError::Protocol(format!("invalid client nonce: {err}")))?;
    write_frame(
        stream,
        &HandshakeMessage::Accepted {
            digest: hex::encode(sign(secret, &client_nonce)),
        },
    )
    .await
}

/// Authenticate an outgoing connection on the client side.
pub async fn initiate<S>(stream: &mut S, secret: &SharedSecret) -> Result<(), RpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_nonce = match expect_message(stream).await? {
        HandshakeMessage::Challenge { nonce } => hex::decode(nonce)
            .map_err(|err| RpcError::Protocol(format!("invalid server nonce: {err}")))?,
        other => {
            return Err(RpcError::Protocol(format!(
                "expected handshake challenge, got {other:?}"
            )));
        }
    };

    let own_nonce = generate_nonce();
    write_frame(
        stream,
        &HandshakeMessage::Answer {
            digest: hex::encode(sign(secret, &server_nonce)),
            nonce: hex::encode(own_nonce),
        },
    )
    .await?;

    match expect_message(stream).await {
        Ok(HandshakeMessage::Accepted { digest }) if verify(secret, &own_nonce, &digest) => Ok(()),
        Ok(HandshakeMessage::Accepted { .. } | HandshakeMessage::Rejected { .. }) => {
            Err(RpcError::AuthenticationMismatch)
        }
        Ok(other) => Err(RpcError::Protocol(format!(
            "expected handshake verdict, got {other:?}"
        ))),
        Err(err) => Err(err),
    }
}
