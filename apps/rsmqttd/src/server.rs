use std::io::{BufReader, Cursor};
use std::sync::Arc;

use anyhow::{Context, Result};
use service::{client_loop, RemoteAddr, ServiceState};
use tokio::net::TcpListener;
use tokio_rustls::rustls::ServerConfig as TlsServerConfig;
use tokio_rustls::{rustls, TlsAcceptor};
use warp::Filter;

use crate::config::{HttpConfig, NetworkConfig, TcpConfig};
use crate::{api, ws_transport};

fn load_tls_acceptor(tls: &crate::config::TlsConfig) -> Result<TlsAcceptor> {
    let cert_data = std::fs::read(&tls.cert)
        .with_context(|| format!("failed to read certificates file: {}", tls.cert))?;
    let key_data = std::fs::read(&tls.key)
        .with_context(|| format!("failed to read key file: {}", tls.key))?;

    let cert = rustls::internal::pemfile::certs(&mut BufReader::new(Cursor::new(cert_data)))
        .map_err(|_| anyhow::anyhow!("failed to load tls certificates"))?;
    let mut keys =
        rustls::internal::pemfile::rsa_private_keys(&mut BufReader::new(Cursor::new(key_data)))
            .map_err(|_| anyhow::anyhow!("failed to load tls key"))?;

    let mut config = TlsServerConfig::new(rustls::NoClientAuth::new());
    config
        .set_single_cert(cert, keys.pop().context("no private key found")?)
        .context("failed to set tls certificate")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn run_tcp_server(state: Arc<ServiceState>, tcp_config: TcpConfig) -> Result<()> {
    let port = tcp_config.port();

    tracing::info!(
        host = %tcp_config.host,
        port = port,
        "tcp listening",
    );

    let acceptor = tcp_config
        .tls
        .as_ref()
        .map(load_tls_acceptor)
        .transpose()?;
    let listener = TcpListener::bind((tcp_config.host.as_str(), port)).await?;

    loop {
        let (stream, addr) = listener.accept().await?;
        let state = state.clone();

        match &acceptor {
            Some(acceptor) => {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(err) => {
                            tracing::warn!(error = %err, remote_addr = %addr, "tls handshake failed");
                            return;
                        }
                    };

                    tracing::debug!(protocol = "tcp+tls", remote_addr = %addr, "incoming connection");
                    let (reader, writer) = tokio::io::split(stream);
                    client_loop(
                        state,
                        reader,
                        writer,
                        RemoteAddr {
                            protocol: "tcp+tls".to_string(),
                            addr: Some(addr.to_string()),
                        },
                    )
                    .await;
                    tracing::debug!(protocol = "tcp+tls", remote_addr = %addr, "connection disconnected");
                });
            }
            None => {
                tokio::spawn(async move {
                    tracing::debug!(protocol = "tcp", remote_addr = %addr, "incoming connection");
                    let (reader, writer) = tokio::io::split(stream);
                    client_loop(
                        state,
                        reader,
                        writer,
                        RemoteAddr {
                            protocol: "tcp".to_string(),
                            addr: Some(addr.to_string()),
                        },
                    )
                    .await;
                    tracing::debug!(protocol = "tcp", remote_addr = %addr, "connection disconnected");
                });
            }
        }
    }
}

async fn run_http_server(state: Arc<ServiceState>, http_config: HttpConfig) -> Result<()> {
    let port = http_config.port();

    tracing::info!(
        host = %http_config.host,
        port = port,
        websocket = http_config.websocket,
        api = http_config.api,
        "http listening",
    );

    let ws_route = warp::any()
        .and_then({
            let enabled = http_config.websocket;
            move || async move {
                if enabled {
                    Ok(())
                } else {
                    Err(warp::reject::not_found())
                }
            }
        })
        .untuple_one()
        .and(ws_transport::handler(state.clone()));

    let api_route = warp::any()
        .and_then({
            let enabled = http_config.api;
            move || async move {
                if enabled {
                    Ok(())
                } else {
                    Err(warp::reject::not_found())
                }
            }
        })
        .untuple_one()
        .and(api::stat(state));

    let routes = ws_route.or(api_route).unify();
    let addr: std::net::IpAddr = http_config.host.parse()?;

    match http_config.tls.as_ref() {
        Some(tls) => {
            warp::serve(routes)
                .tls()
                .cert_path(&tls.cert)
                .key_path(&tls.key)
                .run((addr, port))
                .await;
        }
        None => {
            warp::serve(routes).run((addr, port)).await;
        }
    }

    Ok(())
}

pub async fn run(state: Arc<ServiceState>, network: NetworkConfig) -> Result<()> {
    let mut servers = Vec::new();

    if let Some(tcp_config) = network.tcp {
        let state = state.clone();
        servers.push(tokio::spawn(async move {
            if let Err(err) = run_tcp_server(state, tcp_config).await {
                tracing::error!(error = %err, "tcp server");
            }
        }));
    }

    if let Some(http_config) = network.http {
        let state = state.clone();
        servers.push(tokio::spawn(async move {
            if let Err(err) = run_http_server(state, http_config).await {
                tracing::error!(error = %err, "http server");
            }
        }));
    }

    for handle in servers {
        handle.await.ok();
    }
    Ok(())
}
