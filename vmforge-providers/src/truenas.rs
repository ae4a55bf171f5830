use crate::rpc::{self, Incoming};
use crate::{inventory, ComputeApi, DeleteOptions};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_API_PATH: &str = "/api/current";

/// JSON-RPC client for a TrueNAS middleware endpoint.
pub struct TrueNasClient {
    url: String,
    socket: Mutex<Option<Socket>>,
    next_id: AtomicU64,
}

impl TrueNasClient {
    /// `ws://{host}{api_path}` (or `wss://` with `tls`).
    pub fn endpoint(host: &str, api_path: &str, tls: bool) -> String {
        let scheme = if tls { "wss" } else { "ws" };
        let host = host.trim().trim_end_matches('/');
        let path = if api_path.starts_with('/') {
            api_path.to_string()
        } else {
            format!("/{}", api_path)
        };
        format!("{}://{}{}", scheme, host, path)
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _response) = connect_async(url)
            .await
            .with_context(|| format!("failed to open websocket to {}", url))?;
        tracing::debug!(url, "websocket connected");
        Ok(Self {
            url: url.to_string(),
            socket: Mutex::new(Some(socket)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Send one request and wait for its response. Anything else arriving in
    /// the meantime (notifications, stale responses) is skipped.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut guard = self.socket.lock().await;
        let socket = guard
            .as_mut()
            .ok_or_else(|| anyhow!("connection to {} is closed", self.url))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = rpc::encode_request(id, method, &params)?;
        tracing::debug!(method, id, "rpc call");
        socket.send(Message::Text(request)).await?;

        loop {
            let Some(frame) = socket.next().await else {
                bail!("connection closed while waiting for {} response", method);
            };
            match frame? {
                Message::Text(text) => match rpc::decode_incoming(&text)? {
                    Incoming::Response { id: rid, outcome } if rid == id => {
                        return outcome.map_err(anyhow::Error::from);
                    }
                    Incoming::Response { id: rid, .. } => {
                        tracing::debug!(
                            method,
                            expected = id,
                            got = rid,
                            "skipping unrelated response"
                        );
                    }
                    Incoming::Notification { method: event } => {
                        tracing::trace!(event = %event, "skipping notification");
                    }
                },
                Message::Ping(payload) => socket.send(Message::Pong(payload)).await?,
                Message::Close(frame) => {
                    bail!("connection closed by server while waiting for {}: {:?}", method, frame);
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl ComputeApi for TrueNasClient {
    async fn login(&self, username: &str, password: &str) -> Result<bool> {
        let result = self
            .call("auth.login", vec![json!(username), json!(password)])
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn logout(&self) -> Result<()> {
        self.call("auth.logout", vec![]).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut socket) = self.socket.lock().await.take() else {
            return Ok(());
        };
        socket.close(None).await?;
        Ok(())
    }

    async fn create_vm(&self, spec: &Value) -> Result<inventory::CreatedVm> {
        let result = self.call("vm.create", vec![spec.clone()]).await?;
        serde_json::from_value(result).context("vm.create returned no id")
    }

    async fn create_device(&self, device: &Value) -> Result<()> {
        self.call("vm.device.create", vec![device.clone()]).await?;
        Ok(())
    }

    async fn start_vm(&self, vm_id: i64) -> Result<()> {
        self.call("vm.start", vec![json!(vm_id)]).await?;
        Ok(())
    }

    async fn poweroff_vm(&self, vm_id: i64) -> Result<()> {
        self.call("vm.poweroff", vec![json!(vm_id)]).await?;
        Ok(())
    }

    async fn delete_vm(&self, vm_id: i64, options: DeleteOptions) -> Result<()> {
        self.call("vm.delete", vec![json!(vm_id), serde_json::to_value(options)?])
            .await?;
        Ok(())
    }

    async fn query_vms(&self) -> Result<Vec<inventory::VmSummary>> {
        let result = self.call("vm.query", vec![]).await?;
        Ok(serde_json::from_value(result)?)
    }
}
