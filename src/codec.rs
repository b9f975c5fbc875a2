//! length-prefixed framing of structured messages
//!
//! every frame is an unsigned varint length followed by that many bytes of JSON text. JSON
//! numbers are kept in their textual form, so large integers cross the wire unchanged.

use std::future;
use std::io;
use std::marker::PhantomData;

use asynchronous_codec::{Decoder, Encoder, FramedRead};
use bytes::{Bytes, BytesMut};
use futures_util::{AsyncRead, Stream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use unsigned_varint::codec::UviBytes;

/// a fatal codec error, the byte stream can't be demarcated any more after it
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),

    #[error("serialize message failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// a frame which was demarcated fine but doesn't hold a message
///
/// decoding goes on with the next frame
#[derive(Debug, Error)]
#[error("malformed frame of {} bytes: {err}", frame.len())]
pub struct MalformedFrame {
    pub frame: Bytes,
    #[source]
    pub err: serde_json::Error,
}

/// the length-prefix layer only, frames raw payload bytes
pub struct FrameCodec {
    uvi: UviBytes<Bytes>,
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec").finish_non_exhaustive()
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        let mut uvi = UviBytes::default();
        uvi.set_max_len(max_frame_size);

        Self { uvi }
    }
}

impl Encoder for FrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn encode(&mut self, item: Self::Item, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.uvi.encode(item, dst)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.uvi.decode(src)
    }
}

/// JSON messages over [`FrameCodec`]
#[derive(Debug)]
pub struct Codec<T> {
    frames: FrameCodec,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Codec<T> {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            frames: FrameCodec::new(max_frame_size),
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize> Encoder for Codec<T> {
    type Item = T;
    type Error = CodecError;

    fn encode(&mut self, item: Self::Item, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serialize(&item)?;

        Ok(self.frames.encode(payload, dst)?)
    }
}

impl<T: DeserializeOwned> Decoder for Codec<T> {
    type Item = Result<T, MalformedFrame>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self
            .frames
            .decode(src)?
            .map(|frame| deserialize(frame.freeze())))
    }
}

/// the wire form of a message without the length prefix
pub fn serialize<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(CodecError::Serialize)
}

pub fn deserialize<T: DeserializeOwned>(frame: Bytes) -> Result<T, MalformedFrame> {
    serde_json::from_slice(&frame).map_err(|err| MalformedFrame { frame, err })
}

/// encode a message into one complete frame
pub fn encode<T: Serialize>(message: &T, max_frame_size: usize) -> Result<Bytes, CodecError> {
    let mut dst = BytesMut::new();
    Codec::<&T>::new(max_frame_size).encode(message, &mut dst)?;

    Ok(dst.freeze())
}

/// lazily decode frames from a byte stream
///
/// malformed frames are yielded as errors and decoding continues; an io error or an oversize
/// length prefix ends the stream
pub fn decode<T, R>(reader: R, max_frame_size: usize) -> impl Stream<Item = Result<T, MalformedFrame>>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    FramedRead::new(reader, Codec::<T>::new(max_frame_size))
        .inspect_err(|err| error!(%err, "read frame failed, stop decoding"))
        .take_while(|res| future::ready(res.is_ok()))
        .filter_map(|res| future::ready(res.ok()))
}
