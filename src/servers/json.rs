//! JSON control server
//!
//! Clients send one JSON request per line and receive one JSON reply per line. After a
//! `subscribe` request, value-changed notifications are pushed as `{"update":{...}}` lines.

use std::net::SocketAddr;

use futures::{future, prelude::*};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    select,
    sync::broadcast::{self, error::RecvError},
};
use tokio_util::codec::Framed;

use crate::{
    accessory::{AccessoryHandle, AccessoryHandleError, CharacteristicUpdate},
    global::Global,
};

mod codec;
pub use codec::*;

mod message;
pub use message::*;

#[derive(Debug, Error)]
pub enum JsonServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] JsonCodecError),
}

#[derive(Debug, Error)]
pub enum JsonApiError {
    #[error("unknown accessory: {0}")]
    UnknownAccessory(String),
    #[error(transparent)]
    Handle(#[from] AccessoryHandleError),
}

async fn accessory(global: &Global, name: &str) -> Result<AccessoryHandle, JsonApiError> {
    global
        .get_accessory(name)
        .await
        .ok_or_else(|| JsonApiError::UnknownAccessory(name.to_owned()))
}

async fn handle_request(
    request: ControlMessage,
    global: &Global,
    updates: &mut Option<broadcast::Receiver<CharacteristicUpdate>>,
) -> Result<ControlResponse, JsonApiError> {
    match request {
        ControlMessage::List => Ok(ControlResponse::list(
            global
                .accessories()
                .await
                .iter()
                .map(|handle| handle.name().to_owned())
                .collect(),
        )),

        ControlMessage::Get {
            accessory: name,
            service,
            characteristic,
        } => {
            let value = accessory(global, &name)
                .await?
                .get(service, characteristic)
                .await?;

            Ok(ControlResponse::value(value))
        }

        ControlMessage::Set {
            accessory: name,
            service,
            characteristic,
            value,
        } => {
            accessory(global, &name)
                .await?
                .set(service, characteristic, value)
                .await?;

            Ok(ControlResponse::success())
        }

        ControlMessage::Status { accessory: name } => {
            let handles = match name {
                Some(name) => vec![accessory(global, &name).await?],
                None => global.accessories().await,
            };

            let mut accessories = Vec::with_capacity(handles.len());
            for handle in handles {
                accessories.push(handle.status().await?);
            }

            Ok(ControlResponse::status(accessories))
        }

        ControlMessage::Subscribe => {
            if updates.is_none() {
                *updates = Some(global.subscribe_updates().await);
            }

            Ok(ControlResponse::success())
        }
    }
}

async fn next_update(
    updates: &mut Option<broadcast::Receiver<CharacteristicUpdate>>,
) -> Result<CharacteristicUpdate, RecvError> {
    match updates {
        Some(updates) => updates.recv().await,
        None => future::pending().await,
    }
}

pub async fn handle_client(
    (socket, peer_addr): (TcpStream, SocketAddr),
    global: Global,
) -> Result<(), JsonServerError> {
    debug!(peer_addr = %peer_addr, "accepted new connection");

    let framed = Framed::new(socket, JsonCodec::new());
    let (mut writer, mut reader) = framed.split();

    let mut updates = None;

    loop {
        select! {
            request = reader.next() => {
                let request = match request {
                    Some(request) => request?,
                    None => break,
                };

                trace!(peer_addr = %peer_addr, request = ?request, "processing request");

                let reply = match request {
                    Ok(request) => handle_request(request, &global, &mut updates)
                        .await
                        .unwrap_or_else(|error| ControlResponse::error(&error)),
                    Err(error) => ControlResponse::error(&error),
                };

                trace!(peer_addr = %peer_addr, reply = ?reply, "sending response");
                writer.send(reply).await?;
            },
            update = next_update(&mut updates) => {
                match update {
                    Ok(update) => {
                        writer.send(ControlResponse::Update { update }).await?;
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(peer_addr = %peer_addr, skipped = %skipped, "skipped updates");
                    },
                    Err(RecvError::Closed) => {
                        updates = None;
                    },
                }
            },
        }
    }

    Ok(())
}
