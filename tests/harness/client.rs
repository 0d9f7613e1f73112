//! WsClient - WebSocket client for progress events

#![allow(dead_code)]

use std::time::Duration;

use anyhow::{bail, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl WsClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Send a raw text frame
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.write.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Request a generation
    pub async fn generate(&mut self, prompt: &str) -> Result<()> {
        let msg = serde_json::json!({
            "action": "generate",
            "prompt": prompt,
        });
        self.send_text(&msg.to_string()).await
    }

    /// Receive the next event as JSON
    pub async fn recv_json(&mut self) -> Result<Value> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(serde_json::from_str(&text)?);
                }
                Some(Ok(Message::Close(_))) | None => {
                    bail!("WebSocket closed");
                }
                Some(Err(e)) => bail!("WebSocket error: {}", e),
                _ => continue, // Skip binary/ping/pong frames
            }
        }
    }

    /// Receive with timeout
    pub async fn recv_json_timeout(&mut self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.recv_json()).await {
            Ok(result) => result,
            Err(_) => bail!("Timeout waiting for WebSocket message"),
        }
    }

    /// Receive the next event and return it along with its status
    pub async fn recv_event(&mut self) -> Result<(String, Value)> {
        let event = self.recv_json_timeout(Duration::from_secs(5)).await?;
        let status = event["status"].as_str().unwrap_or_default().to_string();
        Ok((status, event))
    }

    /// Receive events until a completed or error event arrives
    pub async fn collect_cycle(&mut self) -> Result<Vec<Value>> {
        let mut events = Vec::new();
        loop {
            let (status, event) = self.recv_event().await?;
            events.push(event);
            if status == "completed" || status == "error" {
                return Ok(events);
            }
        }
    }

    /// Wait for the server to close the connection
    pub async fn expect_closed(&mut self, timeout: Duration) -> Result<()> {
        let closed = tokio::time::timeout(timeout, async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    _ => continue,
                }
            }
        })
        .await;
        if closed.is_err() {
            bail!("connection still open after {:?}", timeout);
        }
        Ok(())
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<()> {
        self.write.close().await?;
        Ok(())
    }
}
