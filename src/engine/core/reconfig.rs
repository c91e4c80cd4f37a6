// Live reconfiguration mailbox

use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};

use super::request::CompressionRequest;

/// Reply to a reconfiguration message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconfigResponse {
    Ok,
    InternalError,
}

/// Message from a control thread to the encode thread
#[derive(Debug)]
pub struct ReconfigMessage {
    pub config: String,
    pub reply: Sender<ReconfigResponse>,
}

/// Cloneable sending side of a pipeline's mailbox
#[derive(Debug, Clone)]
pub struct ReconfigHandle {
    tx: Sender<ReconfigMessage>,
}

impl ReconfigHandle {
    /// Queue a configuration string; the reply arrives once the encode thread has
    /// processed it at the start of its next frame
    pub fn post(&self, config: impl Into<String>) -> Receiver<ReconfigResponse> {
        let (reply, rx) = mpsc::channel();
        let message = ReconfigMessage {
            config: config.into(),
            reply,
        };
        if let Err(mpsc::SendError(message)) = self.tx.send(message) {
            // pipeline gone
            let _ = message.reply.send(ReconfigResponse::InternalError);
        }
        rx
    }
}

/// Create a mailbox: the handle goes to control threads, the receiver stays with the
/// pipeline
pub fn mailbox() -> (ReconfigHandle, Receiver<ReconfigMessage>) {
    let (tx, rx) = mpsc::channel();
    (ReconfigHandle { tx }, rx)
}

/// Parse `config` on a copy of `request` and swap it in only on success. A `help` token
/// counts as a failure.
pub fn apply_config(request: &mut CompressionRequest, config: &str) -> ReconfigResponse {
    let mut candidate = request.clone();
    candidate.show_help = false;
    match candidate.apply(config) {
        Ok(()) if !candidate.show_help => {
            *request = candidate;
            tracing::info!("Compression reconfigured with \"{}\"", config);
            ReconfigResponse::Ok
        }
        Ok(()) => {
            tracing::warn!("Reconfiguration with \"{}\" asked for help, ignoring", config);
            ReconfigResponse::InternalError
        }
        Err(e) => {
            tracing::error!("Reconfiguration with \"{}\" failed: {}", config, e);
            ReconfigResponse::InternalError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::core::types::Codec;

    #[test]
    fn test_valid_config_replaces_request() {
        let mut request = CompressionRequest::parse("codec=H264:bitrate=2M").unwrap();
        assert_eq!(apply_config(&mut request, "bitrate=4M:gop=40"), ReconfigResponse::Ok);
        assert_eq!(request.bitrate, Some(4_000_000));
        assert_eq!(request.gop, 40);
        assert_eq!(request.codec, Some(Codec::H264));
    }

    #[test]
    fn test_invalid_config_keeps_request() {
        let mut request = CompressionRequest::parse("codec=H264:bitrate=2M").unwrap();
        let before = request.clone();
        // the first token is valid, the second is not
        assert_eq!(
            apply_config(&mut request, "gop=5:crf=fast"),
            ReconfigResponse::InternalError
        );
        assert_eq!(request, before);
        assert_eq!(apply_config(&mut request, "help"), ReconfigResponse::InternalError);
        assert_eq!(request, before);
    }

    #[test]
    fn test_post_without_pipeline() {
        let (handle, rx) = mailbox();
        drop(rx);
        let reply = handle.post("bitrate=1M");
        assert_eq!(reply.recv().unwrap(), ReconfigResponse::InternalError);
    }

    #[test]
    fn test_mailbox_delivers_in_order() {
        let (handle, rx) = mailbox();
        let other = handle.clone();
        let _a = handle.post("gop=10");
        let _b = other.post("gop=20");
        let configs: Vec<_> = rx.try_iter().map(|m| m.config).collect();
        assert_eq!(configs, vec!["gop=10", "gop=20"]);
    }
}
