//! Line-oriented request/response client for the Mayhem USB shell.
//!
//! The shell is half-duplex in protocol terms: write one command, then read
//! lines until `ok` or `error`. Nothing is pipelined, so callers must hold
//! exclusive access for the whole exchange.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::{LinkError, LinkStream};
use crate::config::{ms, CommandBudget, LinkConfig};
use crate::input::text;
use crate::protocol::{self, LinkCapabilities};
use crate::screen::{codec, Frame, ScreenSize};

const READ_BUFFER_SIZE: usize = 4096;
const CLOSE_TIMEOUT: Duration = Duration::from_millis(200);
const RESYNC_MAX_READS: usize = 64;

/// One way of delivering an input command, tried in order.
struct Strategy {
    command: String,
    budget: CommandBudget,
}

pub struct ShellClient {
    config: LinkConfig,
    stream: Option<Box<dyn LinkStream>>,
    read_buf: Vec<u8>,
    /// Complete lines not yet consumed by a command
    pending_lines: VecDeque<String>,
    /// Bytes of the line currently being received
    partial: Vec<u8>,
    capabilities: LinkCapabilities,
    /// A response may still be in flight from a failed or unacked command.
    desynced: bool,
}

impl ShellClient {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            stream: None,
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            pending_lines: VecDeque::new(),
            partial: Vec::with_capacity(512),
            capabilities: LinkCapabilities::default(),
            desynced: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn capabilities(&self) -> LinkCapabilities {
        self.capabilities
    }

    /// Take ownership of a freshly opened stream. Any previous stream is
    /// closed first; buffers and capabilities start from scratch.
    pub async fn open(&mut self, stream: Box<dyn LinkStream>) -> Result<(), LinkError> {
        self.close().await;
        let settle = self.config.settle();
        if !settle.is_zero() {
            sleep(settle).await;
        }
        self.stream = Some(stream);
        self.reset();
        if let Err(e) = self.discard_input(self.config.drain_reads).await {
            self.close().await;
            return Err(e);
        }
        info!("shell link open");
        Ok(())
    }

    /// Release the stream. Never fails and is safe to call when closed.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!("closing shell link");
            match timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
                Ok(Err(e)) => debug!("shutdown failed: {}", e),
                Err(_) => debug!("shutdown timed out"),
                Ok(Ok(())) => {}
            }
        }
        self.reset();
    }

    /// Write `command` and collect response lines until `ok`.
    pub async fn run_command(
        &mut self,
        command: &str,
        limit: Duration,
        max_lines: usize,
    ) -> Result<Vec<String>, LinkError> {
        if self.desynced {
            self.pending_lines.clear();
            self.partial.clear();
            self.desynced = false;
            self.discard_input(RESYNC_MAX_READS).await?;
        }
        self.write_line(command).await?;

        let deadline = Instant::now() + limit;
        let mut lines = Vec::with_capacity(max_lines.min(128));
        while Instant::now() < deadline {
            let Some(line) = self.poll_line(deadline).await? else {
                continue;
            };
            if line == protocol::OK {
                return Ok(lines);
            }
            if line == protocol::ERROR {
                return Err(LinkError::Rejected(command.to_string()));
            }
            if lines.len() >= max_lines {
                self.desynced = true;
                return Err(LinkError::TooLong(command.to_string()));
            }
            lines.push(line);
        }
        self.desynced = true;
        Err(LinkError::Timeout(command.to_string()))
    }

    pub async fn query_resolution(&mut self) -> Result<ScreenSize, LinkError> {
        let budget = self.config.getres;
        let lines = self
            .run_command(protocol::CMD_GETRES, budget.timeout(), budget.max_lines)
            .await?;
        codec::parse_resolution(&lines).ok_or(LinkError::NoResolution)
    }

    /// Ask the firmware for its fast command variants. Older builds reject
    /// `linkcaps`; that just means no fast variants.
    pub async fn detect_link_capabilities(&mut self) -> LinkCapabilities {
        let budget = self.config.linkcaps;
        let capabilities = match self
            .run_command(protocol::CMD_LINKCAPS, budget.timeout(), budget.max_lines)
            .await
        {
            Ok(lines) => LinkCapabilities::parse(&lines),
            Err(e) => {
                debug!("linkcaps unavailable: {}", e);
                LinkCapabilities::default()
            }
        };
        self.capabilities = capabilities;
        info!(
            button_fast = capabilities.button_fast,
            touch_fast = capabilities.touch_fast,
            frame_half = capabilities.frame_half,
            "link capabilities"
        );
        capabilities
    }

    /// Fetch one screen image at `size`, using the half-resolution stream
    /// when the firmware offers it.
    pub async fn fetch_frame(&mut self, size: ScreenSize) -> Result<Frame, LinkError> {
        let (width, height) = (size.width() as usize, size.height() as usize);
        let pixels = if self.capabilities.frame_half {
            let (_, half_height) = size.half();
            let budget = self.config.frame_half;
            let lines = self
                .run_command(
                    protocol::CMD_FRAME_HALF,
                    budget.timeout(),
                    half_height + budget.max_lines,
                )
                .await?;
            codec::decode_short_frame_half(&lines, width, height)?
        } else {
            let budget = self.config.frame;
            let lines = self
                .run_command(protocol::CMD_FRAME, budget.timeout(), height + budget.max_lines)
                .await?;
            codec::decode_short_frame(&lines, width, height)?
        };
        Ok(Frame::new(size, pixels))
    }

    /// Press a button. `Ok(false)` means it was written raw without an ack.
    pub async fn send_button(&mut self, code: u8) -> Result<bool, LinkError> {
        let mut strategies = Vec::with_capacity(2);
        if self.capabilities.button_fast {
            strategies.push(Strategy {
                command: protocol::button_fast_command(code),
                budget: self.config.fast_input,
            });
        }
        strategies.push(Strategy {
            command: protocol::button_command(code),
            budget: self.config.input,
        });
        self.send_with_fallback(&strategies).await
    }

    /// Tap the touchscreen. Same fallback cascade as [`Self::send_button`].
    pub async fn send_touch(&mut self, x: u32, y: u32) -> Result<bool, LinkError> {
        let mut strategies = Vec::with_capacity(2);
        if self.capabilities.touch_fast {
            strategies.push(Strategy {
                command: protocol::touch_fast_command(x, y),
                budget: self.config.fast_input,
            });
        }
        strategies.push(Strategy {
            command: protocol::touch_command(x, y),
            budget: self.config.input,
        });
        self.send_with_fallback(&strategies).await
    }

    /// Type `text` through the firmware keyboard. Returns whether it was acked.
    pub async fn send_keyboard_text(&mut self, text: &str) -> bool {
        let payload = text::to_keyboard_payload(text);
        if payload.is_empty() {
            return false;
        }
        let budget = self.config.keyboard;
        match self
            .run_command(
                &protocol::keyboard_command(&payload),
                budget.timeout(),
                budget.max_lines,
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("keyboard command failed: {}", e);
                false
            }
        }
    }

    async fn send_with_fallback(&mut self, strategies: &[Strategy]) -> Result<bool, LinkError> {
        for strategy in strategies {
            let budget = strategy.budget;
            match self
                .run_command(&strategy.command, budget.timeout(), budget.max_lines)
                .await
            {
                Ok(_) => return Ok(true),
                Err(e) => warn!(command = %strategy.command, "input command failed: {}", e),
            }
        }
        // Some builds interleave shell output around input commands; write
        // every variant raw so the press still reaches the radio.
        for strategy in strategies {
            self.write_line(&strategy.command).await?;
        }
        self.desynced = true;
        Ok(false)
    }

    async fn write_line(&mut self, command: &str) -> Result<(), LinkError> {
        let line = format!("{}{}", command, protocol::LINE_END);
        let chunk_size = self.config.write_chunk.max(1);
        let limits = [
            ms(self.config.write_timeout_ms),
            ms(self.config.write_retry_timeout_ms),
        ];
        let backoff = ms(self.config.write_retry_backoff_ms);
        let stream = self.stream.as_mut().ok_or(LinkError::NotOpen)?;

        for chunk in line.as_bytes().chunks(chunk_size) {
            let mut last_error = None;
            for (attempt, limit) in limits.iter().enumerate() {
                match write_chunk(stream, chunk, *limit).await {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        debug!(attempt, "serial write failed: {}", e);
                        last_error = Some(e);
                        if attempt == 0 {
                            sleep(backoff).await;
                        }
                    }
                }
            }
            if let Some(e) = last_error {
                return Err(LinkError::Write(e));
            }
        }
        Ok(())
    }

    /// Next complete line, or `None` once `deadline` passes.
    async fn poll_line(&mut self, deadline: Instant) -> Result<Option<String>, LinkError> {
        if let Some(line) = self.pending_lines.pop_front() {
            return Ok(Some(line));
        }

        let slice = self.config.read_slice();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let stream = self.stream.as_mut().ok_or(LinkError::NotOpen)?;
            let n = match timeout(slice.min(deadline - now), stream.read(&mut self.read_buf)).await {
                Err(_) => continue,
                Ok(Ok(0)) => return Err(LinkError::Closed),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(LinkError::Read(e)),
            };
            self.feed_read_bytes(n);
            if let Some(line) = self.pending_lines.pop_front() {
                return Ok(Some(line));
            }
        }
    }

    fn feed_read_bytes(&mut self, n: usize) {
        for i in 0..n {
            let byte = self.read_buf[i];
            if byte == b'\n' {
                let mut raw = std::mem::take(&mut self.partial);
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                self.push_line(raw.into_iter().map(char::from).collect());
            } else if self.partial.len() < self.config.max_line_bytes {
                self.partial.push(byte);
            }
        }
    }

    fn push_line(&mut self, line: String) {
        if self.pending_lines.len() >= self.config.max_pending_lines {
            warn!("pending line queue full, dropping oldest line");
            self.pending_lines.pop_front();
        }
        self.pending_lines.push_back(line);
    }

    /// Throw away bytes until the link goes quiet: stale output from before
    /// we attached, or the tail of a response nobody is waiting for.
    async fn discard_input(&mut self, max_reads: usize) -> Result<(), LinkError> {
        let wait = ms(self.config.drain_read_ms);
        for _ in 0..max_reads {
            let stream = self.stream.as_mut().ok_or(LinkError::NotOpen)?;
            match timeout(wait, stream.read(&mut self.read_buf)).await {
                Err(_) => break,
                Ok(Ok(0)) => return Err(LinkError::Closed),
                Ok(Ok(n)) => debug!(bytes = n, "discarded stale input"),
                Ok(Err(e)) => return Err(LinkError::Read(e)),
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.pending_lines.clear();
        self.partial.clear();
        self.capabilities = LinkCapabilities::default();
        self.desynced = false;
    }
}

async fn write_chunk<W>(stream: &mut W, chunk: &[u8], limit: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let write = async {
        stream.write_all(chunk).await?;
        stream.flush().await
    };
    match timeout(limit, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "serial write timed out")),
    }
}

/// Read everything currently buffered on `stream` as text (test helper for
/// scripted peers).
#[cfg(test)]
pub(crate) async fn read_available<R: tokio::io::AsyncRead + Unpin>(stream: &mut R) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    while let Ok(Ok(n)) = timeout(Duration::from_millis(30), stream.read(&mut buf)).await {
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::codec::encode_rgb6;
    use tokio::io::DuplexStream;

    fn test_config() -> LinkConfig {
        LinkConfig {
            settle_ms: 0,
            drain_read_ms: 5,
            read_slice_ms: 20,
            ..LinkConfig::default()
        }
    }

    async fn open_pair() -> (ShellClient, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut shell = ShellClient::new(test_config());
        shell.open(Box::new(client)).await.unwrap();
        (shell, server)
    }

    #[tokio::test]
    async fn test_run_command_collects_until_ok() {
        let (mut shell, mut server) = open_pair().await;
        server.write_all(b"first\r\nsecond\nok\r\n").await.unwrap();

        let lines = shell
            .run_command("getres", Duration::from_secs(1), 8)
            .await
            .unwrap();
        assert_eq!(lines, vec!["first", "second"]);
        assert_eq!(read_available(&mut server).await, "getres\r\n");
    }

    #[tokio::test]
    async fn test_run_command_error_terminator() {
        let (mut shell, mut server) = open_pair().await;
        server.write_all(b"error\r\n").await.unwrap();

        let err = shell
            .run_command("bogus", Duration::from_secs(1), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Rejected(ref c) if c == "bogus"));
    }

    #[tokio::test]
    async fn test_run_command_times_out_on_silence() {
        let (mut shell, _server) = open_pair().await;
        let started = std::time::Instant::now();

        let err = shell
            .run_command("getres", Duration::from_millis(200), 8)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, LinkError::Timeout(_)));
        assert!(elapsed >= Duration::from_millis(190), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(700), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_run_command_too_long() {
        let (mut shell, mut server) = open_pair().await;
        server
            .write_all(b"1\r\n2\r\n3\r\n4\r\n5\r\n6\r\nok\r\n")
            .await
            .unwrap();

        let err = shell
            .run_command("screenframeshort", Duration::from_secs(1), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::TooLong(_)));
    }

    #[tokio::test]
    async fn test_resync_after_overlong_response() {
        let (mut shell, mut server) = open_pair().await;
        server
            .write_all(b"1\r\n2\r\n3\r\n4\r\n5\r\n6\r\nok\r\n")
            .await
            .unwrap();
        assert!(shell
            .run_command("screenframeshort", Duration::from_secs(1), 2)
            .await
            .is_err());
        read_available(&mut server).await;

        // the tail of the first response must not answer the second command
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"getres\r\n");
            server.write_all(b"320x240\r\nok\r\n").await.unwrap();
            server
        });
        assert_eq!(
            shell.query_resolution().await.unwrap(),
            ScreenSize::H2_LANDSCAPE
        );
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let (mut shell, mut server) = open_pair().await;
        let writer = tokio::spawn(async move {
            for part in [&b"ch> \r\n24"[..], b"0x3", b"20\r", b"\nok", b"\r\n"] {
                server.write_all(part).await.unwrap();
                sleep(Duration::from_millis(15)).await;
            }
            server
        });

        let size = shell.query_resolution().await.unwrap();
        assert_eq!(size, ScreenSize::new(240, 320).unwrap());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_peer_is_transport_error() {
        let (mut shell, server) = open_pair().await;
        drop(server);
        let err = shell
            .run_command("getres", Duration::from_millis(300), 8)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::link::ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_not_open() {
        let mut shell = ShellClient::new(test_config());
        let err = shell
            .run_command("getres", Duration::from_millis(50), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotOpen));
        shell.close().await;
        shell.close().await;
        assert!(!shell.is_open());
    }

    #[tokio::test]
    async fn test_open_drains_stale_bytes() {
        let (client, mut server) = tokio::io::duplex(4096);
        server.write_all(b"garbage\r\nok\r\n").await.unwrap();
        let mut shell = ShellClient::new(test_config());
        shell.open(Box::new(client)).await.unwrap();

        server.write_all(b"240x320\r\nok\r\n").await.unwrap();
        assert_eq!(
            shell.query_resolution().await.unwrap(),
            ScreenSize::H2_PORTRAIT
        );
    }

    #[tokio::test]
    async fn test_capabilities_fallback_on_old_firmware() {
        let (mut shell, mut server) = open_pair().await;
        server.write_all(b"error\r\n").await.unwrap();
        let caps = shell.detect_link_capabilities().await;
        assert_eq!(caps, LinkCapabilities::default());
    }

    #[tokio::test]
    async fn test_capabilities_reset_on_close() {
        let (mut shell, mut server) = open_pair().await;
        server
            .write_all(b"button_fast=1\r\ntouch_fast=0\r\nok\r\n")
            .await
            .unwrap();
        assert!(shell.detect_link_capabilities().await.button_fast);
        assert!(shell.capabilities().button_fast);
        shell.close().await;
        assert_eq!(shell.capabilities(), LinkCapabilities::default());
    }

    #[tokio::test]
    async fn test_fetch_half_frame_when_capable() {
        let (mut shell, mut server) = open_pair().await;
        server
            .write_all(b"screenframeshort2=1\r\nok\r\n")
            .await
            .unwrap();
        shell.detect_link_capabilities().await;
        read_available(&mut server).await;

        let red = encode_rgb6(3, 0, 0).to_string();
        let reply = format!("{0}{0}\r\n{0}{0}\r\nok\r\n", red);
        server.write_all(reply.as_bytes()).await.unwrap();

        let frame = shell
            .fetch_frame(ScreenSize::new(4, 4).unwrap())
            .await
            .unwrap();
        assert!(frame.pixels().iter().all(|&p| p == 0xFFFF0000));
        assert_eq!(read_available(&mut server).await, "screenframeshort2\r\n");
    }

    #[tokio::test]
    async fn test_fetch_frame_too_short_is_decode_error() {
        let (mut shell, mut server) = open_pair().await;
        server.write_all(b"  \r\nok\r\n").await.unwrap();
        let err = shell
            .fetch_frame(ScreenSize::new(2, 2).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::link::ErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_button_fast_falls_back_to_standard() {
        let (mut shell, mut server) = open_pair().await;
        server.write_all(b"button_fast=1\r\nok\r\n").await.unwrap();
        shell.detect_link_capabilities().await;
        read_available(&mut server).await;

        server.write_all(b"error\r\nok\r\n").await.unwrap();
        assert!(shell.send_button(5).await.unwrap());
        assert_eq!(
            read_available(&mut server).await,
            "button_fast 5\r\nbutton 5\r\n"
        );
    }

    #[tokio::test]
    async fn test_button_raw_fallback_is_unacknowledged() {
        let (mut shell, mut server) = open_pair().await;
        server.write_all(b"button_fast=1\r\nok\r\n").await.unwrap();
        shell.detect_link_capabilities().await;
        read_available(&mut server).await;

        server.write_all(b"error\r\nerror\r\n").await.unwrap();
        assert!(!shell.send_button(4).await.unwrap());
        assert_eq!(
            read_available(&mut server).await,
            "button_fast 4\r\nbutton 4\r\nbutton_fast 4\r\nbutton 4\r\n"
        );
    }

    #[tokio::test]
    async fn test_touch_without_fast_capability() {
        let (mut shell, mut server) = open_pair().await;
        server.write_all(b"ok\r\n").await.unwrap();
        assert!(shell.send_touch(12, 34).await.unwrap());
        assert_eq!(read_available(&mut server).await, "touch 12 34\r\n");
    }

    #[tokio::test]
    async fn test_keyboard_text() {
        let (mut shell, mut server) = open_pair().await;
        assert!(!shell.send_keyboard_text("\u{1}\u{2}").await);
        assert_eq!(read_available(&mut server).await, "");

        server.write_all(b"ok\r\n").await.unwrap();
        assert!(shell.send_keyboard_text("433.92").await);
        assert_eq!(
            read_available(&mut server).await,
            "keyboard 3433332E3932\r\n"
        );

        server.write_all(b"error\r\n").await.unwrap();
        assert!(!shell.send_keyboard_text("1").await);
    }
}
