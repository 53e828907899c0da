//! Chunked stream transfer.
//!
//! ```text
//! sender                                   receiver
//!   |-- stream {messageId, streamId, type, targetProperty} -->|
//!   |<------------------------------------- stream-ack -------|
//!   |-- chunk {streamId, chunkId, payload} ------------------>|   one at a time,
//!   |<------------------------------------- chunk-ack --------|   in order
//!   |-- stream-end {messageId, streamId} -------------------->|
//!   |<------------------------------------- stream-end-ack ---|
//! ```

use tracing::{trace, warn};

use reqres_core::{
    crypto, split_chunks, topic, ChunkFrame, ChunkId, CoreError, Frame, FrameKind, MessageId,
    Payload, Reassembly, StreamEndFrame, StreamFrame, StreamId, TargetProperty,
};

use crate::connection::Channel;
use crate::endpoint::Inner;
use crate::error::{ProtocolError, Result};

impl Inner {
    /// Publish one frame to the peer.
    pub(crate) async fn publish_frame(&self, channel: &Channel, frame: &Frame) -> Result<()> {
        let topic = topic::frame_topic(&channel.send_prefix, frame.kind());
        let body = frame.encode()?;
        self.transport
            .publish(&topic, body.into(), self.config.qos)
            .await
    }

    /// Acknowledge the frame identified by `id`.
    pub(crate) async fn send_ack(&self, channel: &Channel, kind: FrameKind, id: &str) -> Result<()> {
        self.publish_frame(channel, &Frame::ack(kind, id)).await
    }

    /// Publish `frame` and wait for its ack keyed by `id`.
    ///
    /// The waiter is registered before publishing.
    pub(crate) async fn send_and_wait(&self, channel: &Channel, frame: Frame, id: &str) -> Result<()> {
        let Some(ack) = frame.kind().ack() else {
            return self.publish_frame(channel, &frame).await;
        };
        let waiter = self.router.expect_ack(ack, id);
        self.publish_frame(channel, &frame).await?;
        waiter.wait(self.config.ack_timeout).await
    }

    /// Send one typed value as a stream within `message_id`.
    pub(crate) async fn send_stream(
        &self,
        channel: &Channel,
        message_id: &MessageId,
        target: TargetProperty,
        payload: &Payload,
    ) -> Result<()> {
        let (payload_type, encoded) = payload.encode()?;
        let stream_id = StreamId::generate();

        trace!(
            peer = %channel.peer,
            message_id = %message_id,
            stream_id = %stream_id,
            target = %target,
            payload_type = %payload_type,
            len = encoded.len(),
            "sending stream"
        );

        let open = Frame::Stream(StreamFrame {
            message_id: message_id.clone(),
            stream_id: stream_id.clone(),
            payload_type,
            target_property: target,
        });
        self.send_and_wait(channel, open, stream_id.as_str()).await?;

        for piece in split_chunks(&encoded, self.config.max_chunk_size) {
            let chunk_id = ChunkId::generate();
            let sealed = crypto::encrypt(&piece, &channel.secret)?;
            let chunk = Frame::Chunk(ChunkFrame {
                stream_id: stream_id.clone(),
                chunk_id: chunk_id.clone(),
                payload: sealed,
            });
            trace!(stream_id = %stream_id, chunk_id = %chunk_id, len = piece.len(), "sending chunk");
            self.send_and_wait(channel, chunk, chunk_id.as_str()).await?;
        }

        let end = Frame::StreamEnd(StreamEndFrame {
            message_id: message_id.clone(),
            stream_id: stream_id.clone(),
        });
        self.send_and_wait(channel, end, stream_id.as_str()).await
    }

    /// Receive the stream opened by `open`.
    ///
    /// Every chunk is acked even when it fails to decrypt or decode; the
    /// first such failure becomes the result once the stream ends.
    pub(crate) async fn receive_stream(&self, channel: &Channel, open: &StreamFrame) -> Result<Payload> {
        let stream_id = &open.stream_id;
        let mut route = self
            .router
            .open_stream(stream_id)
            .ok_or_else(|| CoreError::MalformedFrame(format!("duplicate stream {}", stream_id)))?;

        self.send_ack(channel, FrameKind::StreamAck, stream_id.as_str()).await?;

        let mut reassembly = Reassembly::new(open.payload_type);
        let mut failure: Option<CoreError> = None;

        loop {
            match route.next(self.config.idle_timeout).await? {
                Frame::Chunk(chunk) => {
                    let pushed = crypto::open(&chunk.payload, &channel.secret)
                        .and_then(|plain| reassembly.push(&plain));
                    if let Err(e) = pushed {
                        warn!(
                            peer = %channel.peer,
                            stream_id = %stream_id,
                            chunk_id = %chunk.chunk_id,
                            error = %e,
                            "bad chunk"
                        );
                        failure.get_or_insert(e);
                    }
                    self.send_ack(channel, FrameKind::ChunkAck, chunk.chunk_id.as_str())
                        .await?;
                }
                Frame::StreamEnd(_) => {
                    self.send_ack(channel, FrameKind::StreamEndAck, stream_id.as_str())
                        .await?;
                    break;
                }
                _ => {}
            }
        }

        trace!(
            peer = %channel.peer,
            stream_id = %stream_id,
            chunks = reassembly.chunk_count(),
            "stream complete"
        );

        match failure {
            Some(e) => Err(ProtocolError::Stream(e)),
            None => Ok(reassembly.finish()?),
        }
    }
}
