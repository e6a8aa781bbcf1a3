//! Client-side transport: one request frame out, one response frame back.

use std::net::{TcpStream, ToSocketAddrs};

use veildex_common::wire::{self, Request, Response};
use veildex_common::VeildexError;

/// A synchronous request/response channel to the index server. Abstracted
/// so tests can drive an in-process engine through the same client code
/// that normally talks TCP.
pub trait ServerConn {
    fn call(&mut self, request: &Request) -> Result<Response, VeildexError>;
}

/// Blocking TCP transport speaking the length-prefixed wire protocol.
pub struct TcpConn {
    stream: TcpStream,
}

impl TcpConn {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpConn, VeildexError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(TcpConn { stream })
    }
}

impl ServerConn for TcpConn {
    fn call(&mut self, request: &Request) -> Result<Response, VeildexError> {
        let payload = wire::encode(request)?;
        wire::write_frame(&mut self.stream, &payload)?;
        let frame = wire::read_frame(&mut self.stream)?
            .ok_or_else(|| VeildexError::Protocol("server closed the connection".into()))?;
        wire::decode(&frame)
    }
}
