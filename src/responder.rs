use anyhow::Result;

use crate::{endpoint::Endpoint, greeting::Scheme};

/// Fast-path denial for a connection classified `Blocked` *before*
/// dialling upstream. No upstream socket is ever opened in this path.
/// `Limited` is never routed here — the tipping-point response is only
/// emitted mid-stream by the Splice Engine once the quota is actually
/// reached.
pub async fn send_blocked(client: &Endpoint, scheme: Scheme, block_html: &str) -> Result<()> {
    match scheme {
        Scheme::Https => client.write(b"HTTP/1.1 403\r\n\r\n").await?,
        Scheme::Http => {
            let body = format!("HTTP/1.1 200 OK\r\n\r\n{block_html}");
            client.write(body.as_bytes()).await?;
        }
    }
    client.close();
    Ok(())
}
