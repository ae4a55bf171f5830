//! JSON-RPC 2.0 framing used by the fabric's WebSocket endpoint.

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

pub fn encode_request(id: u64, method: &str, params: &[Value]) -> Result<String> {
    Ok(serde_json::to_string(&Request {
        jsonrpc: "2.0",
        id,
        method,
        params,
    })?)
}

/// An `error` member returned by the fabric.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        // Middleware puts the human-readable reason in data.reason.
        if let Some(reason) = self
            .data
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(Value::as_str)
        {
            if reason != self.message {
                write!(f, ": {}", reason.trim())?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, PartialEq)]
pub enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// Server-initiated message (event subscriptions, job progress).
    Notification { method: String },
}

pub fn decode_incoming(text: &str) -> Result<Incoming> {
    let msg: Value = serde_json::from_str(text)?;

    let Some(id) = msg.get("id").filter(|v| !v.is_null()) else {
        let method = msg
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok(Incoming::Notification { method });
    };
    let id = id
        .as_u64()
        .ok_or_else(|| anyhow!("unexpected response id: {}", id))?;

    if let Some(err) = msg.get("error").filter(|v| !v.is_null()) {
        return Ok(Incoming::Response {
            id,
            outcome: Err(RpcError {
                code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
                data: err.get("data").cloned(),
            }),
        });
    }

    Ok(Incoming::Response {
        id,
        outcome: Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_shape() {
        let text = encode_request(
            3,
            "vm.delete",
            &[json!(12), json!({"zvols": true, "force": true})],
        )
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            v,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "vm.delete",
                "params": [12, {"zvols": true, "force": true}]
            })
        );
    }

    #[test]
    fn decodes_result() {
        let msg = decode_incoming(r#"{"jsonrpc":"2.0","id":4,"result":{"id":17}}"#).unwrap();
        assert_eq!(
            msg,
            Incoming::Response {
                id: 4,
                outcome: Ok(json!({"id": 17}))
            }
        );
    }

    #[test]
    fn decodes_error_with_reason() {
        let msg = decode_incoming(
            r#"{"jsonrpc":"2.0","id":5,"error":{"code":22,"message":"Invalid params","data":{"reason":"[EINVAL] vm_create.name: exists"}}}"#,
        )
        .unwrap();
        let Incoming::Response { id, outcome } = msg else {
            panic!("expected response");
        };
        assert_eq!(id, 5);
        let err = outcome.unwrap_err();
        assert_eq!(err.code, 22);
        assert_eq!(
            err.to_string(),
            "[22] Invalid params: [EINVAL] vm_create.name: exists"
        );
    }

    #[test]
    fn null_result_is_ok() {
        let msg = decode_incoming(r#"{"jsonrpc":"2.0","id":6,"result":null}"#).unwrap();
        assert_eq!(
            msg,
            Incoming::Response {
                id: 6,
                outcome: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn notifications_have_no_id() {
        let msg = decode_incoming(
            r#"{"jsonrpc":"2.0","method":"collection_update","params":{}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Incoming::Notification {
                method: "collection_update".into()
            }
        );
    }
}
