use std::sync::Arc;

use anyhow::Result;
use smol::future;

use crate::{
    endpoint::Endpoint,
    greeting::{Greeting, Scheme},
    policy::{Initiator, Ledger, Verdict},
};

/// Fixed read/write chunk size; bounds per-connection buffering to a
/// known memory envelope.
pub(crate) const CHUNK_SIZE: usize = 1 << 20;

/// Everything the Splice Engine needs to meter the server->client
/// direction, passed in explicitly rather than looked up via any
/// ambient/global state.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub initiator: Initiator,
    pub verdict: Verdict,
    pub ledger: Ledger,
    pub block_html: Arc<str>,
    pub limit_html: Arc<str>,
}

impl PolicyContext {
    fn quota(&self) -> Option<u64> {
        match self.verdict {
            Verdict::Limited { quota_bytes } => Some(quota_bytes),
            Verdict::Blocked => Some(0),
            Verdict::Allow => None,
        }
    }
}

/// Drives the bidirectional splice for one already-dialled connection:
/// dispatches the greeting, then runs two concurrent forwarders to
/// completion, each independently.
pub async fn run(
    client: Endpoint,
    server: Endpoint,
    greeting: &Greeting,
    policy: &PolicyContext,
) -> Result<()> {
    match greeting.scheme {
        Scheme::Https => {
            client
                .write(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await?;
        }
        Scheme::Http => {
            server.write(&greeting.raw).await?;
        }
    }

    let scheme = greeting.scheme;
    let policy = policy.clone();

    // Both directions share one client fd and one server fd via cloned
    // Endpoints, so `zip` (not `race`) drives each to its own natural
    // completion: whichever side reaches EOF first half-closes its
    // write-only, letting the other direction keep draining whatever the
    // real peer still has in flight instead of being cancelled mid-read.
    future::zip(
        client_to_server(client.clone(), server.clone()),
        server_to_client(server, client, scheme, policy),
    )
    .await;

    Ok(())
}

async fn client_to_server(client: Endpoint, server: Endpoint) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match client.read(&mut buf).await {
            Ok(0) | Err(_) => {
                server.close_write();
                return;
            }
            Ok(n) => n,
        };
        if server.write(&buf[..n]).await.is_err() {
            // Connection-reset errors are swallowed here: logged as
            // informational, never propagated as a task failure.
            log::info!("connection reset while forwarding to server");
            server.close_write();
            return;
        }
    }
}

async fn server_to_client(
    server: Endpoint,
    client: Endpoint,
    scheme: Scheme,
    policy: PolicyContext,
) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match server.read(&mut buf).await {
            Ok(0) | Err(_) => {
                client.close_write();
                return;
            }
            Ok(n) => n,
        };

        if let Some(quota) = policy.quota() {
            if policy.ledger.reached(&policy.initiator, quota).await {
                let body = if policy.verdict == Verdict::Blocked {
                    &policy.block_html
                } else {
                    &policy.limit_html
                };
                trip(&client, scheme, body).await;
                return;
            }
        }

        if client.write(&buf[..n]).await.is_err() {
            log::info!("connection reset while forwarding to client");
            return;
        }

        if policy.quota().is_some() {
            policy.ledger.add(&policy.initiator, n as u64).await;
        }
    }
}

/// Emits the canned over-quota response then fully closes the client
/// side — this is a terminal path, not ordinary EOF propagation, so it
/// tears down both directions rather than half-closing. The
/// already-written over-limit chunk is never undone; the *next* attempt
/// is what trips.
async fn trip(client: &Endpoint, scheme: Scheme, body: &str) {
    let msg = match scheme {
        Scheme::Https => "HTTP/1.1 403\r\n\r\n".to_string(),
        Scheme::Http => format!("HTTP/1.1 200 OK\r\n\r\n{body}"),
    };
    let _ = client.write(msg.as_bytes()).await;
    client.close();
}
