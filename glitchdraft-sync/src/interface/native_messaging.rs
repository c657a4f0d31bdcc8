//! # Native messaging 宿主
//!
//! 浏览器扩展通过标准输入输出与宿主通信：每条消息为 4 字节小端长度前缀
//! 加 UTF-8 JSON。请求可携带 `requestId`，响应原样带回；UI 事件以
//! `action: "remoteUpdate"` 推送。所有输出由单一写任务串行写出。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::commands::{SyncRequest, SyncResponse};
use crate::application::handler::SyncCommandHandler;
use crate::domain::model::SyncEvent;

/// 浏览器到宿主的单条消息上限
const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// 宿主到浏览器的单条消息上限
const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;
const OUTBOUND_QUEUE: usize = 256;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .little_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// 拆出请求 ID 并解析请求
pub fn parse_message(frame: &[u8]) -> (Option<Value>, Result<SyncRequest, String>) {
    let mut value: Value = match serde_json::from_slice(frame) {
        Ok(value) => value,
        Err(err) => return (None, Err(format!("invalid JSON message: {}", err))),
    };
    let request_id = value
        .as_object_mut()
        .and_then(|obj| obj.remove("requestId"));
    let request = serde_json::from_value::<SyncRequest>(value)
        .map_err(|err| format!("unsupported request: {}", err));
    (request_id, request)
}

fn with_request_id(mut payload: Value, request_id: Option<Value>) -> Value {
    if let (Some(id), Some(obj)) = (request_id, payload.as_object_mut()) {
        obj.insert("requestId".to_string(), id);
    }
    payload
}

fn response_payload(response: &SyncResponse, request_id: Option<Value>) -> Value {
    let payload = serde_json::to_value(response)
        .unwrap_or_else(|err| json!({"success": false, "message": err.to_string()}));
    with_request_id(payload, request_id)
}

pub struct NativeMessagingHost {
    handler: Arc<SyncCommandHandler>,
    events: broadcast::Receiver<SyncEvent>,
}

impl NativeMessagingHost {
    pub fn new(handler: Arc<SyncCommandHandler>, events: broadcast::Receiver<SyncEvent>) -> Self {
        Self { handler, events }
    }

    /// 处理消息直到输入关闭或收到停止信号
    pub async fn serve<R, W>(self, reader: R, writer: W, shutdown: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel::<Value>(OUTBOUND_QUEUE);

        let mut sink = FramedWrite::new(writer, codec(MAX_OUTBOUND_FRAME));
        let writer_task = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let bytes = match serde_json::to_vec(&message) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(error = %err, "failed to encode outbound message");
                        continue;
                    }
                };
                if bytes.len() > MAX_OUTBOUND_FRAME {
                    warn!(size = bytes.len(), "outbound message exceeds frame limit, dropped");
                    continue;
                }
                if let Err(err) = sink.send(Bytes::from(bytes)).await {
                    warn!(error = %err, "failed to write outbound message");
                    break;
                }
            }
        });

        let event_tx = out_tx.clone();
        let mut events = self.events;
        let event_task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_value(&event) {
                        Ok(payload) => {
                            if event_tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to encode sync event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ui event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut frames = FramedRead::new(reader, codec(MAX_INBOUND_FRAME));
        info!("native messaging host ready");
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = frames.next() => frame,
            };
            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    warn!(error = %err, "failed to read inbound message");
                    break;
                }
                None => {
                    debug!("native messaging input closed");
                    break;
                }
            };

            let (request_id, request) = parse_message(&frame);
            let request = match request {
                Ok(request) => request,
                Err(message) => {
                    warn!(%message, "rejecting inbound message");
                    let payload = response_payload(&SyncResponse::failure(message), request_id);
                    if out_tx.send(payload).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let handler = self.handler.clone();
            let tx = out_tx.clone();
            tokio::spawn(async move {
                let response = handler.handle(request).await;
                if tx.send(response_payload(&response, request_id)).await.is_err() {
                    debug!("output closed before response was written");
                }
            });
        }

        event_task.abort();
        drop(out_tx);
        match tokio::time::timeout(DRAIN_TIMEOUT, writer_task).await {
            Ok(joined) => joined.context("native messaging writer task failed")?,
            Err(_) => warn!("timed out draining pending responses"),
        }
        Ok(())
    }
}
