//! Client side of the socket protocol

use gatepass_api::{Actor, Command, Event, Request, Response, ResponseResult};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// Request/response connection to gatepassd
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let (read_half, writer) = UnixStream::connect(socket_path).await?.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            next_request_id: 1,
        })
    }

    /// Send an anonymous command, such as an approval callback
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request = Request::new(self.take_request_id(), command);
        self.call(request).await
    }

    /// Send a command on behalf of an authenticated actor.
    /// Only accepted from a trusted peer.
    pub async fn send_as(&mut self, actor: Actor, command: Command) -> IpcResult<Response> {
        let request = Request::new(self.take_request_id(), command).with_actor(actor);
        self.call(request).await
    }

    fn take_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    async fn call(&mut self, request: Request) -> IpcResult<Response> {
        let mut frame = serde_json::to_string(&request)?;
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await?;

        read_frame(&mut self.reader).await
    }

    /// Turn this connection into an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        let response = self.send(Command::SubscribeEvents).await?;
        if let ResponseResult::Err(e) = response.result {
            return Err(IpcError::ServerError(e.message));
        }

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }
}

/// Events pushed by gatepassd after a subscribe
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    // Dropping the write half ends the connection on the server side
    _writer: OwnedWriteHalf,
}

impl EventStream {
    pub async fn next(&mut self) -> IpcResult<Event> {
        read_frame(&mut self.reader).await
    }
}

async fn read_frame<T: DeserializeOwned>(reader: &mut BufReader<OwnedReadHalf>) -> IpcResult<T> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    Ok(serde_json::from_str(line.trim())?)
}
