//! Minimal gateway client
//!
//! Used by tests and tooling to drive the gateway the way a transport
//! front-end would.

use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::Message;

pub struct GatewayClient {
    user_id: Uuid,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl GatewayClient {
    /// Connect and complete the Hello/Welcome handshake
    pub async fn connect(addr: SocketAddr, user_id: Uuid) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            user_id,
            reader,
            writer,
        };

        client.send(&Message::Hello { user_id }).await?;
        match client.recv().await? {
            Message::Welcome { user_id: echoed } if echoed == user_id => {
                debug!(user_id = %user_id, addr = %addr, "Connected to gateway");
                Ok(client)
            }
            Message::Failed { kind, message } => Err(Error::Failed { kind, message }),
            other => Err(Error::Protocol(format!("expected Welcome, got {other:?}"))),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        write_frame(&mut self.writer, msg).await
    }

    /// Next message from the gateway
    pub async fn recv(&mut self) -> Result<Message> {
        read_frame(&mut self.reader).await
    }
}
