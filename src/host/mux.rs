//! Stream multiplexing over one transport connection
//!
//! Every frame is a 4-byte big-endian length followed by a 4-byte stream id,
//! a 1-byte kind and the payload. The dialing side opens streams with odd ids.
//!
//! | kind | meaning                                   |
//! |------|-------------------------------------------|
//! | 0    | open a stream                             |
//! | 1    | data                                      |
//! | 2    | close: the sender will write no more      |
//! | 3    | reset: abort both directions              |
//!
//! Frames for an unknown stream are answered with a reset, except resets.

use crate::constants::{MUX_MAX_FRAME_DATA, MUX_OUTBOUND_CAPACITY};
use crate::host::transport::IoStream;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::debug;

const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Open,
    Data,
    Close,
    Reset,
}

impl FrameKind {
    fn code(self) -> u8 {
        match self {
            FrameKind::Open => 0,
            FrameKind::Data => 1,
            FrameKind::Close => 2,
            FrameKind::Reset => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FrameKind::Open),
            1 => Some(FrameKind::Data),
            2 => Some(FrameKind::Close),
            3 => Some(FrameKind::Reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: u32,
    pub kind: FrameKind,
    pub data: Bytes,
}

impl Frame {
    fn control(stream: u32, kind: FrameKind) -> Self {
        Self {
            stream,
            kind,
            data: Bytes::new(),
        }
    }

    fn data(stream: u32, data: Bytes) -> Self {
        Self {
            stream,
            kind: FrameKind::Data,
            data,
        }
    }
}

/// Length-prefixed mux frames
pub struct MuxCodec {
    inner: LengthDelimitedCodec,
}

impl MuxCodec {
    pub fn new() -> Self {
        let inner = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(4)
            .max_frame_length(HEADER_LEN + MUX_MAX_FRAME_DATA)
            .new_codec();
        Self { inner }
    }
}

impl Default for MuxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MuxCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame>> {
        let Some(mut body) = self.inner.decode(src)? else {
            return Ok(None);
        };
        if body.len() < HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("mux frame of {} bytes has no header", body.len()),
            ));
        }

        let stream = body.get_u32();
        let code = body.get_u8();
        let kind = FrameKind::from_code(code).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown mux frame kind {}", code),
            )
        })?;

        Ok(Some(Frame {
            stream,
            kind,
            data: body.freeze(),
        }))
    }
}

impl Encoder<Frame> for MuxCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> io::Result<()> {
        let mut body = BytesMut::with_capacity(HEADER_LEN + frame.data.len());
        body.put_u32(frame.stream);
        body.put_u8(frame.kind.code());
        body.extend_from_slice(&frame.data);
        self.inner.encode(body.freeze(), dst)
    }
}

type Wire = Framed<IoStream, MuxCodec>;

enum Inbound {
    Data(Bytes),
    Reset,
}

/// Live streams of one session, keyed by id
#[derive(Default)]
struct Registry {
    streams: HashMap<u32, mpsc::UnboundedSender<Inbound>>,
    closed: bool,
}

impl Registry {
    fn insert(&mut self, id: u32, inbound: mpsc::UnboundedSender<Inbound>) -> bool {
        if self.closed || self.streams.contains_key(&id) {
            return false;
        }
        self.streams.insert(id, inbound);
        true
    }

    fn close(&mut self) {
        self.closed = true;
        self.streams.clear();
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn session_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "mux session closed")
}

fn stream_reset() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "stream reset by peer")
}

/// Channels into the reader and writer tasks of one session
struct Session {
    outbound: mpsc::Sender<Frame>,
    control: mpsc::UnboundedSender<Frame>,
    registry: Arc<Mutex<Registry>>,
}

impl Session {
    fn spawn(io: IoStream, incoming: Option<mpsc::UnboundedSender<MuxStream>>) -> Self {
        let (sink, frames) = Framed::new(io, MuxCodec::new()).split();
        let (outbound, outbound_rx) = mpsc::channel(MUX_OUTBOUND_CAPACITY);
        let (control, control_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Mutex::new(Registry::default()));
        let done = CancellationToken::new();

        tokio::spawn(write_frames(sink, outbound_rx, control_rx, done.clone()));

        let reader = FrameReader {
            registry: Arc::clone(&registry),
            outbound: outbound.downgrade(),
            control: control.clone(),
            incoming,
        };
        tokio::spawn(reader.run(frames, done));

        Self {
            outbound,
            control,
            registry,
        }
    }

    fn stream(&self, id: u32, inbound: mpsc::UnboundedReceiver<Inbound>) -> MuxStream {
        MuxStream::new(
            id,
            inbound,
            self.outbound.clone(),
            self.control.clone(),
            Arc::clone(&self.registry),
        )
    }
}

/// Drains queued frames onto the socket until every stream writer is gone
///
/// Data and close frames keep their order; resets go out once the data
/// queue is idle.
async fn write_frames(
    mut sink: SplitSink<Wire, Frame>,
    mut outbound: mpsc::Receiver<Frame>,
    mut control: mpsc::UnboundedReceiver<Frame>,
    done: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            Some(frame) = control.recv() => frame,
        };
        if let Err(e) = sink.send(frame).await {
            debug!("Mux session write failed: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
    done.cancel();
}

struct FrameReader {
    registry: Arc<Mutex<Registry>>,
    outbound: mpsc::WeakSender<Frame>,
    control: mpsc::UnboundedSender<Frame>,
    incoming: Option<mpsc::UnboundedSender<MuxStream>>,
}

impl FrameReader {
    async fn run(self, mut frames: SplitStream<Wire>, done: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = done.cancelled() => break,
                frame = frames.next() => frame,
            };
            match frame {
                Some(Ok(frame)) => self.handle(frame),
                Some(Err(e)) => {
                    debug!("Mux session read failed: {}", e);
                    break;
                }
                None => break,
            }
        }
        lock(&self.registry).close();
    }

    fn handle(&self, frame: Frame) {
        let id = frame.stream;
        match frame.kind {
            FrameKind::Open => self.accept(id),
            FrameKind::Data => {
                let delivered = lock(&self.registry)
                    .streams
                    .get(&id)
                    .is_some_and(|tx| tx.send(Inbound::Data(frame.data)).is_ok());
                if !delivered {
                    self.reset(id);
                }
            }
            FrameKind::Close => {
                // Dropping the sender ends the stream after its buffered data
                lock(&self.registry).streams.remove(&id);
            }
            FrameKind::Reset => {
                if let Some(tx) = lock(&self.registry).streams.remove(&id) {
                    let _ = tx.send(Inbound::Reset);
                }
            }
        }
    }

    fn accept(&self, id: u32) {
        let (Some(incoming), Some(outbound)) = (&self.incoming, self.outbound.upgrade()) else {
            return self.reset(id);
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if !lock(&self.registry).insert(id, tx) {
            return self.reset(id);
        }

        let stream = MuxStream::new(
            id,
            rx,
            outbound,
            self.control.clone(),
            Arc::clone(&self.registry),
        );
        // On failure the returned stream is dropped, which resets it
        let _ = incoming.send(stream);
    }

    fn reset(&self, id: u32) {
        let _ = self.control.send(Frame::control(id, FrameKind::Reset));
    }
}

/// Dialing side of a session: opens outbound streams
pub struct MuxClient {
    session: Session,
    next_id: AtomicU32,
}

impl MuxClient {
    pub fn new(io: IoStream) -> Self {
        Self {
            session: Session::spawn(io, None),
            next_id: AtomicU32::new(1),
        }
    }

    pub async fn open(&self) -> io::Result<MuxStream> {
        let id = self.next_id.fetch_add(2, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if !lock(&self.session.registry).insert(id, tx) {
            return Err(session_closed());
        }

        let stream = self.session.stream(id, rx);
        self.session
            .outbound
            .send(Frame::control(id, FrameKind::Open))
            .await
            .map_err(|_| session_closed())?;
        Ok(stream)
    }
}

/// Accepting side of a session: yields streams opened by the remote end
pub struct MuxServer {
    incoming: mpsc::UnboundedReceiver<MuxStream>,
    _session: Session,
}

impl MuxServer {
    pub fn new(io: IoStream) -> Self {
        let (tx, incoming) = mpsc::unbounded_channel();
        Self {
            _session: Session::spawn(io, Some(tx)),
            incoming,
        }
    }

    /// Next inbound stream; `None` once the connection is gone
    pub async fn accept(&mut self) -> Option<MuxStream> {
        self.incoming.recv().await
    }
}

/// One logical stream inside a session
///
/// Shutdown sends a close frame. Dropping a stream whose write side is
/// still open resets it.
pub struct MuxStream {
    id: u32,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    pending: Bytes,
    outbound: PollSender<Frame>,
    control: mpsc::UnboundedSender<Frame>,
    registry: Arc<Mutex<Registry>>,
    write_closed: bool,
    reset: bool,
}

impl MuxStream {
    fn new(
        id: u32,
        inbound: mpsc::UnboundedReceiver<Inbound>,
        outbound: mpsc::Sender<Frame>,
        control: mpsc::UnboundedSender<Frame>,
        registry: Arc<Mutex<Registry>>,
    ) -> Self {
        Self {
            id,
            inbound,
            pending: Bytes::new(),
            outbound: PollSender::new(outbound),
            control,
            registry,
            write_closed: false,
            reset: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = buf.remaining().min(this.pending.len());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.reset {
                return Poll::Ready(Err(stream_reset()));
            }

            match ready!(this.inbound.poll_recv(cx)) {
                Some(Inbound::Data(data)) => this.pending = data,
                Some(Inbound::Reset) => this.reset = true,
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.reset {
            return Poll::Ready(Err(stream_reset()));
        }
        if this.write_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream write side closed",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(this.outbound.poll_reserve(cx)).map_err(|_| session_closed())?;
        let n = buf.len().min(MUX_MAX_FRAME_DATA);
        this.outbound
            .send_item(Frame::data(this.id, Bytes::copy_from_slice(&buf[..n])))
            .map_err(|_| session_closed())?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Queued frames are flushed by the session writer
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.write_closed {
            return Poll::Ready(Ok(()));
        }
        if this.reset {
            return Poll::Ready(Err(stream_reset()));
        }

        ready!(this.outbound.poll_reserve(cx)).map_err(|_| session_closed())?;
        this.outbound
            .send_item(Frame::control(this.id, FrameKind::Close))
            .map_err(|_| session_closed())?;
        this.write_closed = true;
        Poll::Ready(Ok(()))
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        lock(&self.registry).streams.remove(&self.id);
        if !self.write_closed && !self.reset {
            let _ = self
                .control
                .send(Frame::control(self.id, FrameKind::Reset));
        }
    }
}
