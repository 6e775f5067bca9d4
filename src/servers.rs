//! TCP servers exposing the accessories

use std::{fmt::Display, future::Future, net::SocketAddr};

use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{global::Global, models::ServerConfig};

pub mod json;

/// Running server. The listener is shut down when the handle is dropped.
pub struct ServerHandle {
    local_addr: SocketAddr,
    join_handle: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

pub async fn bind<F, E>(
    name: &'static str,
    options: impl ServerConfig,
    global: Global,
    handle_client: impl Fn((TcpStream, SocketAddr), Global) -> F + Send + 'static,
) -> Result<ServerHandle, std::io::Error>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let listener = TcpListener::bind((options.bind(), options.port())).await?;
    let local_addr = listener.local_addr()?;

    info!(server = %name, address = %local_addr, "server listening");

    let join_handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    let client = handle_client((socket, peer_addr), global.clone());

                    tokio::spawn(async move {
                        match client.await {
                            Ok(()) => {
                                debug!(server = %name, peer_addr = %peer_addr, "client disconnected");
                            }
                            Err(error) => {
                                warn!(server = %name, peer_addr = %peer_addr, error = %error, "client error");
                            }
                        }
                    });
                }
                Err(error) => {
                    warn!(server = %name, error = %error, "accepting connection failed");
                }
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        join_handle,
    })
}
