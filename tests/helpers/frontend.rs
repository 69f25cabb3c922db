//! Minimal debugger frontend speaking raw HTTP and WebSocket frames.

use script_inspector::transport::websocket::{
    decode_frame, encode_client_frame, FrameDecode, OPCODE_CLOSE, OPCODE_TEXT,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];
const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub fn upgrade_request(host: &str, path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        path, host
    )
}

/// Everything the server sends until it closes the connection.
pub async fn raw_exchange(port: u16, request: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    timeout(IO_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Text(String),
    Close,
    Eof,
}

pub struct TestFrontend {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TestFrontend {
    /// Connect and complete the WebSocket handshake for `/<target_id>`.
    pub async fn connect(port: u16, target_id: &str) -> Self {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = upgrade_request(&format!("localhost:{}", port), &format!("/{}", target_id));
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut frontend = Self {
            stream,
            buffer: Vec::new(),
        };
        let head = frontend.read_head().await;
        assert!(
            head.starts_with("HTTP/1.1 101 Switching Protocols"),
            "unexpected handshake response: {}",
            head
        );
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        frontend
    }

    async fn fill(&mut self) -> bool {
        let mut chunk = [0u8; 4096];
        let n = timeout(IO_TIMEOUT, self.stream.read(&mut chunk))
            .await
            .expect("timed out waiting for the server")
            .unwrap_or(0);
        self.buffer.extend_from_slice(&chunk[..n]);
        n > 0
    }

    async fn read_head(&mut self) -> String {
        loop {
            if let Some(end) = self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                let head: Vec<u8> = self.buffer.drain(..end + 4).collect();
                return String::from_utf8(head).unwrap();
            }
            if !self.fill().await {
                return String::from_utf8_lossy(&self.buffer).into_owned();
            }
        }
    }

    pub async fn send_text(&mut self, message: &str) {
        self.stream
            .write_all(&encode_client_frame(OPCODE_TEXT, message.as_bytes(), MASK))
            .await
            .unwrap();
    }

    pub async fn send_close(&mut self) {
        self.stream
            .write_all(&encode_client_frame(OPCODE_CLOSE, b"", MASK))
            .await
            .unwrap();
    }

    pub async fn receive(&mut self) -> Received {
        loop {
            match decode_frame(&self.buffer, false) {
                FrameDecode::Text { payload, consumed } => {
                    self.buffer.drain(..consumed);
                    return Received::Text(String::from_utf8(payload).unwrap());
                }
                FrameDecode::Close { consumed } => {
                    self.buffer.drain(..consumed);
                    return Received::Close;
                }
                FrameDecode::Incomplete => {
                    if !self.fill().await {
                        return Received::Eof;
                    }
                }
                FrameDecode::Error(e) => panic!("server sent a bad frame: {}", e),
            }
        }
    }

    pub async fn receive_text(&mut self) -> String {
        match self.receive().await {
            Received::Text(text) => text,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
