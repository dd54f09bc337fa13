use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use smol::{
    future,
    net::{TcpListener, TcpStream},
};

use crate::{
    endpoint::Endpoint,
    greeting::Greeting,
    init::{config::ResponseBodies, shutdown::GracefulShutdown},
    policy::{Ledger, PolicyTable, Verdict},
    responder,
    splice::{self, PolicyContext},
};

/// Everything the per-accept Connection Handler needs, shared by
/// reference across every connection. Only the Ledger is mutable shared
/// state; the policy table and response bodies are read-only for the
/// process's lifetime.
pub struct AppState {
    pub policy: PolicyTable,
    pub ledger: Ledger,
    pub bodies: ResponseBodies,
}

/// Binds TCP on IPv4 and IPv6 `localhost`, accepts indefinitely, and
/// spawns one Handler task per accepted connection. Stops accepting on
/// shutdown, drains in-flight handlers, then returns.
pub async fn serve(port: u16, app: Arc<AppState>, shutdown: &GracefulShutdown) -> Result<()> {
    let v4 = TcpListener::bind(("127.0.0.1", port)).await?;
    log::info!("meterproxy listening on 127.0.0.1:{port}");

    let v6 = match TcpListener::bind(("::1", port)).await {
        Ok(listener) => {
            log::info!("meterproxy listening on [::1]:{port}");
            Some(listener)
        }
        Err(err) => {
            log::warn!("IPv6 localhost bind failed, continuing on IPv4 only: {err}");
            None
        }
    };

    let mut tasks = vec![smol::spawn(accept_loop(v4, app.clone(), shutdown.clone()))];
    if let Some(v6) = v6 {
        tasks.push(smol::spawn(accept_loop(v6, app, shutdown.clone())));
    }

    for task in tasks {
        task.await?;
    }

    shutdown.wait_inflight_zero().await;
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    app: Arc<AppState>,
    shutdown: GracefulShutdown,
) -> Result<()> {
    loop {
        let Some((stream, peer)) = accept_or_shutdown(&listener, &shutdown).await? else {
            break;
        };

        log::info!("accept connection from {peer}");

        let app = app.clone();
        let shutdown_for_guard = shutdown.clone();
        smol::spawn(async move {
            let _guard = shutdown_for_guard.inflight_guard();
            if let Err(err) = handle_connection(stream, peer, &app).await {
                log::warn!("peer={peer} error: {err:#}");
            }
        })
        .detach();
    }
    Ok(())
}

async fn accept_or_shutdown(
    listener: &TcpListener,
    shutdown: &GracefulShutdown,
) -> std::io::Result<Option<(TcpStream, SocketAddr)>> {
    let accept_fut = async { listener.accept().await.map(Some) };
    let shutdown_fut = async {
        shutdown.wait_shutting_down().await;
        Ok(None)
    };
    future::or(accept_fut, shutdown_fut).await
}

/// Per-accept orchestrator: reads the greeting, classifies it,
/// fast-path-denies a `Blocked` verdict before ever dialling upstream,
/// otherwise dials and hands off to the Splice Engine.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, app: &AppState) -> Result<()> {
    let client = Endpoint::new(stream);

    let mut buf = vec![0u8; splice::CHUNK_SIZE];
    let n = client.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    let greeting = match Greeting::parse(&buf[..n]) {
        Ok(greeting) => greeting,
        Err(err) => {
            log::debug!("peer={peer} malformed greeting: {err}");
            client.close();
            return Ok(());
        }
    };

    log::info!("peer={peer} {} {}", greeting.method, greeting.absolute_url);

    let (initiator, verdict) = app.policy.classify(&greeting.hostname);
    log::debug!(
        "peer={peer} hostname={} initiator={initiator} verdict={verdict:?}",
        greeting.hostname
    );

    if verdict == Verdict::Blocked {
        responder::send_blocked(&client, greeting.scheme, &app.bodies.block_html).await?;
        return Ok(());
    }

    let server_stream = match TcpStream::connect((greeting.hostname.as_str(), greeting.port)).await
    {
        Ok(stream) => stream,
        Err(err) => {
            log::info!(
                "Connection refused: {} {} ({err})",
                greeting.method,
                greeting.absolute_url
            );
            return Ok(());
        }
    };
    let server = Endpoint::new(server_stream);

    let policy_ctx = PolicyContext {
        initiator,
        verdict,
        ledger: app.ledger.clone(),
        block_html: app.bodies.block_html.clone(),
        limit_html: app.bodies.limit_html.clone(),
    };

    splice::run(client, server, &greeting, &policy_ctx).await
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use smol::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn test_app(
        blocked: &[&str],
        limited: &[(&str, u64)],
        block_html: &str,
        limit_html: &str,
    ) -> Arc<AppState> {
        let blocked: HashSet<String> = blocked.iter().map(|s| s.to_string()).collect();
        let limited: HashMap<String, u64> = limited.iter().map(|(h, q)| (h.to_string(), *q)).collect();
        Arc::new(AppState {
            policy: PolicyTable::new(blocked, limited),
            ledger: Ledger::new(),
            bodies: ResponseBodies {
                block_html: block_html.into(),
                limit_html: limit_html.into(),
            },
        })
    }

    /// Origin double: echoes a fixed response on any forwarded request
    /// that starts with `GET`.
    async fn spawn_echo_origin() -> (smol::Task<()>, u16) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = smol::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                smol::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let Ok(n) = stream.read(&mut buf).await else {
                        return;
                    };
                    if buf[..n].starts_with(b"GET") {
                        let _ = stream.write_all(b"response for HTTP request").await;
                        let _ = stream.flush().await;
                    }
                })
                .detach();
            }
        });
        (task, port)
    }

    /// Binds an ephemeral proxy listener, accepts exactly one connection,
    /// and drives it through `handle_connection` — the same per-accept
    /// path `serve()` uses, without `serve()`'s own bind/shutdown plumbing.
    async fn run_one_connection(app: Arc<AppState>) -> (TcpStream, smol::Task<Result<()>>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_task = smol::spawn(async move {
            let (stream, peer) = listener.accept().await?;
            handle_connection(stream, peer, &app).await
        });
        let client = TcpStream::connect(addr).await.unwrap();
        (client, server_task)
    }

    #[test]
    fn http_passthrough_forwards_origin_reply_verbatim() {
        smol::block_on(async {
            let (_origin, origin_port) = spawn_echo_origin().await;
            let app = test_app(&[], &[], "", "");
            let (mut client, server_task) = run_one_connection(app).await;

            let req = format!("GET localhost:{origin_port} HTTP/1.1\r\n\r\n");
            client.write_all(req.as_bytes()).await.unwrap();
            client.flush().await.unwrap();

            let mut buf = vec![0u8; 4096];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"response for HTTP request");

            server_task.await.unwrap();
        });
    }

    #[test]
    fn https_tunnel_replies_connection_established() {
        smol::block_on(async {
            let (_origin, origin_port) = spawn_echo_origin().await;
            let app = test_app(&[], &[], "", "");
            let (mut client, server_task) = run_one_connection(app).await;

            let req = format!("CONNECT localhost:{origin_port} HTTP/1.1\r\n\r\n");
            client.write_all(req.as_bytes()).await.unwrap();
            client.flush().await.unwrap();

            let mut buf = vec![0u8; 4096];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"HTTP/1.1 200 Connection established\r\n\r\n");

            drop(client);
            let _ = server_task.await;
        });
    }

    #[test]
    fn http_blocklist_serves_block_page_as_200() {
        smol::block_on(async {
            let app = test_app(&["localhost"], &[], "<h1>blocked</h1>", "");
            // Blocked is fast-pathed before dial, so no upstream is ever
            // contacted — the target port need not be reachable.
            let (mut client, server_task) = run_one_connection(app).await;

            let req = "GET localhost:9 HTTP/1.1\r\n\r\n";
            client.write_all(req.as_bytes()).await.unwrap();
            client.flush().await.unwrap();

            let mut buf = vec![0u8; 4096];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"HTTP/1.1 200 OK\r\n\r\n<h1>blocked</h1>");

            server_task.await.unwrap();
        });
    }

    #[test]
    fn https_blocklist_replies_403() {
        smol::block_on(async {
            let app = test_app(&["localhost"], &[], "", "");
            let (mut client, server_task) = run_one_connection(app).await;

            let req = "CONNECT localhost:9 HTTP/1.1\r\n\r\n";
            client.write_all(req.as_bytes()).await.unwrap();
            client.flush().await.unwrap();

            let mut buf = vec![0u8; 4096];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"HTTP/1.1 403\r\n\r\n");

            server_task.await.unwrap();
        });
    }

    #[test]
    fn http_quota_trip_serves_limit_page_on_next_connection() {
        smol::block_on(async {
            let (_origin, origin_port) = spawn_echo_origin().await;
            let response: &[u8] = b"response for HTTP request";
            let app = test_app(
                &[],
                &[("localhost", response.len() as u64)],
                "",
                "<h1>limit</h1>",
            );

            {
                let (mut client, server_task) = run_one_connection(app.clone()).await;
                let req = format!("GET localhost:{origin_port} HTTP/1.1\r\n\r\n");
                client.write_all(req.as_bytes()).await.unwrap();
                client.flush().await.unwrap();

                let mut buf = vec![0u8; 4096];
                let n = client.read(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], response);
                server_task.await.unwrap();
            }

            // Independent connection: the ledger already sits at quota, so
            // the limit page is served before any origin bytes are relayed.
            {
                let (mut client, server_task) = run_one_connection(app.clone()).await;
                let req = format!("GET localhost:{origin_port} HTTP/1.1\r\n\r\n");
                client.write_all(req.as_bytes()).await.unwrap();
                client.flush().await.unwrap();

                let mut buf = vec![0u8; 4096];
                let n = client.read(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], b"HTTP/1.1 200 OK\r\n\r\n<h1>limit</h1>");
                server_task.await.unwrap();
            }
        });
    }

    #[test]
    fn unreachable_host_closes_client_without_writing_bytes() {
        // Stands in for a DNS failure: both paths fall into
        // `handle_connection`'s same dial-failure arm, which never
        // writes to the client before closing.
        smol::block_on(async {
            let probe = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let dead_port = probe.local_addr().unwrap().port();
            drop(probe);

            let app = test_app(&[], &[], "", "");
            let (mut client, server_task) = run_one_connection(app).await;

            let req = format!("GET localhost:{dead_port} HTTP/1.1\r\n\r\n");
            client.write_all(req.as_bytes()).await.unwrap();
            client.flush().await.unwrap();

            let mut buf = vec![0u8; 4096];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(n, 0, "expected a clean close, got {n} bytes");

            server_task.await.unwrap();
        });
    }
}
