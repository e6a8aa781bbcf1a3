//! Tokio front-end: accepts connections, frames requests, dispatches to
//! the engine.
//!
//! One task per connection; each connection serves any number of
//! request/response pairs. A frame that fails to decode gets an error
//! response but keeps the connection alive; transport failures end the
//! task.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use veildex_common::params::MAX_FRAME_LEN;
use veildex_common::wire::{self, Request, Response};
use veildex_common::VeildexError;

use crate::engine::ServerEngine;

/// Accept loop; runs until the listener fails.
pub async fn serve(listener: TcpListener, engine: Arc<ServerEngine>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            debug!(%peer, "connection opened");
            match handle_client(stream, engine).await {
                Ok(()) => debug!(%peer, "connection closed"),
                Err(e) => warn!(%peer, error = %e, "connection aborted"),
            }
        });
    }
}

async fn handle_client(
    mut stream: TcpStream,
    engine: Arc<ServerEngine>,
) -> Result<(), VeildexError> {
    loop {
        let Some(frame) = read_frame(&mut stream).await? else {
            return Ok(());
        };
        let response = match wire::decode::<Request>(&frame) {
            Ok(request) => dispatch(&engine, request),
            Err(e) => {
                error!(error = %e, "undecodable request frame");
                Response::error(e.to_string())
            }
        };
        let payload = wire::encode(&response)?;
        write_frame(&mut stream, &payload).await?;
    }
}

/// Routes one decoded request. Public so in-process harnesses can drive
/// the engine through the exact server-side path.
pub fn dispatch(engine: &ServerEngine, request: Request) -> Response {
    match request {
        Request::InitHandler { db, ggm_size } => {
            engine.init_handler(&db, ggm_size);
            Response::ok()
        }
        Request::AddEntries { db, map, entry } => {
            match engine.add_entries(&db, map, vec![entry]) {
                Ok(_) => Response::ok(),
                Err(e) => Response::error(e.to_string()),
            }
        }
        Request::AddEntriesBatch { db, map, entries } => {
            match engine.add_entries(&db, map, entries) {
                Ok(_) => Response::ok(),
                Err(e) => Response::error(e.to_string()),
            }
        }
        Request::Search { db, query } => {
            let started = Instant::now();
            match engine.search(&db, &query) {
                Ok(results) => {
                    debug!(
                        db,
                        results = results.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "search served"
                    );
                    Response::Results(results)
                }
                Err(e) => Response::error(e.to_string()),
            }
        }
    }
}

async fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>, VeildexError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(VeildexError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), VeildexError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(VeildexError::FrameTooLarge(payload.len()));
    }
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}
