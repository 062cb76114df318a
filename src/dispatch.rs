//! RPC method dispatch.
//!
//! Decoded messages from a client land here. Requests produce exactly one
//! response; the error convention is uniform: on failure the response's
//! error field carries a descriptive string and the result is nil.
//! Notifications produce no response; failures are logged and dropped.

use bytes::Bytes;
use rmpv::Value;

use crate::keys::{self, KeyEvent};
use crate::pty::SpawnCommand;
use crate::registry::{ClientId, Registry};
use crate::render;
use crate::rpc::Message;
use crate::session::Session;

/// Handle one decoded message from `client_id`.
pub async fn handle_message(registry: &Registry, client_id: ClientId, msg: Message) {
    match msg {
        Message::Request {
            msgid,
            method,
            params,
        } => {
            let result = handle_request(registry, client_id, &method, &params).await;
            let response = match result {
                Ok(value) => Message::response_ok(msgid, value),
                Err(error) => {
                    tracing::debug!(client = client_id, method = %method, %error, "request failed");
                    Message::response_err(msgid, &error)
                }
            };
            let inner = registry.lock();
            if let Some(client) = inner.clients.get(&client_id) {
                client.send_data(response.encode());
            }
        }
        Message::Notification { method, params } => {
            if let Err(error) = handle_notification(registry, client_id, &method, &params).await {
                tracing::warn!(client = client_id, method = %method, %error, "notification dropped");
            }
        }
        Message::Response { msgid, .. } => {
            // Clients do not issue requests to themselves; a stray response
            // is a protocol misuse, not an error.
            tracing::warn!(client = client_id, msgid, "unexpected response message");
        }
    }
}

async fn handle_request(
    registry: &Registry,
    client_id: ClientId,
    method: &str,
    params: &Value,
) -> Result<Value, String> {
    match method {
        "ping" => Ok(Value::from("pong")),
        // A client cannot discover the fd the daemon accepted for it, yet
        // detach_pty identifies clients by exactly that fd.
        "client_id" => Ok(Value::from(client_id as u64)),
        "spawn_pty" => spawn_pty(registry, params),
        "attach_pty" => attach_pty(registry, client_id, params),
        "detach_pty" => detach_pty(registry, params),
        "write_pty" => write_pty(registry, params).await,
        "resize_pty" => resize_pty(registry, params),
        "list_sessions" => Ok(list_sessions(registry)),
        "kill_session" => kill_session(registry, params),
        other => Err(format!("unknown method: {other}")),
    }
}

async fn handle_notification(
    registry: &Registry,
    _client_id: ClientId,
    method: &str,
    params: &Value,
) -> Result<(), String> {
    match method {
        "write_pty" => write_pty(registry, params).await.map(|_| ()),
        "resize_pty" => resize_pty(registry, params).map(|_| ()),
        "key_input" => key_input(registry, params).await,
        other => Err(format!("unknown method: {other}")),
    }
}

fn spawn_pty(registry: &Registry, params: &Value) -> Result<Value, String> {
    let args = params_array(params)?;
    let rows = arg_u16(args, 0).unwrap_or(24);
    let cols = arg_u16(args, 1).unwrap_or(80);
    let command = match args.get(2).and_then(Value::as_str) {
        Some(cmd) => SpawnCommand::Command {
            command: cmd.to_string(),
        },
        None => SpawnCommand::Shell {
            shell: registry.options().shell.clone(),
        },
    };

    // The ID is consumed even if the spawn fails: IDs are never reused.
    let id = registry.allocate_session_id();
    let (session, wake_rx) = Session::spawn(id, rows, cols, &command).map_err(|e| {
        tracing::warn!(session = id, ?e, "PTY spawn failed");
        format!("spawn failed: {e}")
    })?;
    let term = std::sync::Arc::clone(&session.term);
    registry.insert_session(session);
    render::spawn(registry.clone(), id, term, wake_rx);
    Ok(Value::from(id))
}

fn attach_pty(registry: &Registry, client_id: ClientId, params: &Value) -> Result<Value, String> {
    let args = params_array(params)?;
    let sid = arg_u64(args, 0).ok_or("invalid params")?;

    let mut inner = registry.lock();
    let session = inner.sessions.get_mut(&sid).ok_or("session not found")?;
    // Re-attaching is a no-op that still replays a full redraw.
    if !session.attached.contains(&client_id) {
        session.attached.push(client_id);
    }
    session.pending_full.insert(client_id);
    session.poke_wake();
    if let Some(client) = inner.clients.get_mut(&client_id) {
        client.attached.insert(sid);
    }
    tracing::info!(client = client_id, session = sid, "client attached");
    Ok(Value::from(sid))
}

fn detach_pty(registry: &Registry, params: &Value) -> Result<Value, String> {
    let args = params_array(params)?;
    let sid = arg_u64(args, 0).ok_or("invalid params")?;
    let fd: ClientId = arg_u64(args, 1)
        .and_then(|n| i32::try_from(n).ok())
        .ok_or("invalid params")?;

    let mut inner = registry.lock();
    let session = inner.sessions.get_mut(&sid).ok_or("session not found")?;
    let position = session
        .attached
        .iter()
        .position(|c| *c == fd)
        .ok_or("invalid params")?;
    session.attached.remove(position);
    session.pending_full.remove(&fd);
    session.keep_alive = true;
    if let Some(client) = inner.clients.get_mut(&fd) {
        client.attached.remove(&sid);
    }
    tracing::info!(client = fd, session = sid, "client detached, session kept alive");
    Ok(Value::Nil)
}

async fn write_pty(registry: &Registry, params: &Value) -> Result<Value, String> {
    let args = params_array(params)?;
    let sid = arg_u64(args, 0).ok_or("invalid params")?;
    let data = args
        .get(1)
        .and_then(Value::as_slice)
        .ok_or("invalid params")?
        .to_vec();

    let input_tx = {
        let inner = registry.lock();
        inner
            .sessions
            .get(&sid)
            .ok_or("session not found")?
            .input_sender()
    };
    input_tx
        .send(Bytes::from(data))
        .await
        .map_err(|_| "write failed".to_string())?;
    Ok(Value::Nil)
}

fn resize_pty(registry: &Registry, params: &Value) -> Result<Value, String> {
    let args = params_array(params)?;
    let sid = arg_u64(args, 0).ok_or("invalid params")?;
    let rows = arg_u16(args, 1).ok_or("invalid params")?;
    let cols = arg_u16(args, 2).ok_or("invalid params")?;

    let mut inner = registry.lock();
    let session = inner.sessions.get_mut(&sid).ok_or("session not found")?;
    session.resize(rows, cols).map_err(|e| {
        tracing::warn!(session = sid, ?e, "PTY resize failed");
        "resize failed".to_string()
    })?;
    Ok(Value::Nil)
}

fn list_sessions(registry: &Registry) -> Value {
    let inner = registry.lock();
    let sessions = inner
        .sessions
        .values()
        .map(|s| {
            Value::Map(vec![
                (Value::from("id"), Value::from(s.id)),
                (Value::from("rows"), Value::from(s.rows)),
                (Value::from("cols"), Value::from(s.cols)),
                (
                    Value::from("attached"),
                    Value::from(s.attached.len() as u64),
                ),
                (Value::from("keep_alive"), Value::Boolean(s.keep_alive)),
            ])
        })
        .collect();
    Value::Array(sessions)
}

fn kill_session(registry: &Registry, params: &Value) -> Result<Value, String> {
    let args = params_array(params)?;
    let sid = arg_u64(args, 0).ok_or("invalid params")?;

    let session = {
        let mut inner = registry.lock();
        let session = inner.sessions.remove(&sid).ok_or("session not found")?;
        for client in inner.clients.values_mut() {
            client.attached.remove(&sid);
        }
        session
    };
    session.destroy();
    Ok(Value::Nil)
}

async fn key_input(registry: &Registry, params: &Value) -> Result<(), String> {
    let args = params_array(params)?;
    let sid = arg_u64(args, 0).ok_or("invalid params")?;
    let notation = args.get(1).cloned().ok_or("invalid params")?;
    let event: KeyEvent =
        rmpv::ext::from_value(notation).map_err(|e| format!("invalid key event: {e}"))?;

    let (term, input_tx) = {
        let inner = registry.lock();
        let session = inner.sessions.get(&sid).ok_or("session not found")?;
        (std::sync::Arc::clone(&session.term), session.input_sender())
    };

    // Encoding depends on the terminal's current modes, so it happens under
    // the session mutex.
    let bytes = {
        let term = term.lock();
        keys::encode_key(&event, term.application_cursor())
    };

    if let Some(bytes) = bytes {
        input_tx
            .send(Bytes::from(bytes))
            .await
            .map_err(|_| "write failed".to_string())?;
    }
    Ok(())
}

fn params_array(params: &Value) -> Result<&[Value], String> {
    params
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| "invalid params".to_string())
}

fn arg_u64(args: &[Value], index: usize) -> Option<u64> {
    args.get(index).and_then(Value::as_u64)
}

fn arg_u16(args: &[Value], index: usize) -> Option<u16> {
    arg_u64(args, index).and_then(|n| u16::try_from(n).ok())
}
