//! Companion socket
//!
//! A single-client TCP server that lets a companion program drive the
//! console. Messages are UTF-8 lines terminated by '\n'; every received
//! line is acknowledged with "200/OK" before it is executed.

use crate::console::{Console, Controller, LineSource};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

pub const ACK: &str = "200/OK";

/// Pause after a failed accept, e.g. while out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("Failed to open companion socket: {0}")]
    Bind(io::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Listening side of the companion socket
pub struct CompanionServer {
    listener: TcpListener,
}

impl CompanionServer {
    /// Bind the server socket
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, CompanionError> {
        // tokio sets SO_REUSEADDR on unix, so restarts can rebind right away
        let listener = TcpListener::bind(addr).await.map_err(CompanionError::Bind)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CompanionError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve one companion at a time until the console goes offline
    pub async fn serve<C: Controller + ?Sized>(&self, console: &Console<C>) {
        while console.is_online() {
            debug!("TCP socket open, waiting for companion...");

            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = console.wait_offline() => break,
            };

            let (stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept companion: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        _ = console.wait_offline() => break,
                    }
                    continue;
                }
            };

            info!("Companion connected from {}", addr);
            let mut connection = CompanionConnection::new(stream);
            match console.start(&mut connection).await {
                Ok(()) => info!("Companion disconnected"),
                Err(e) => info!("Companion disconnected: {}", e),
            }
        }
    }
}

/// An accepted companion client
pub struct CompanionConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl CompanionConnection {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Receive the next '\n'-terminated line
    ///
    /// Bytes after the newline stay buffered for the next call. `None`
    /// means the client went away before finishing a line.
    pub async fn receive_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let read = self.reader.read_until(b'\n', &mut buf).await?;
        if read == 0 || buf.last() != Some(&b'\n') {
            if !buf.is_empty() {
                warn!("Companion closed mid-line, dropping {} bytes", buf.len());
            }
            return Ok(None);
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Send a message, adding the terminating newline if it is missing
    pub async fn send_line(&mut self, msg: &str) -> io::Result<()> {
        let mut msg = msg.to_string();
        if !msg.ends_with('\n') {
            msg.push('\n');
        }
        self.writer.write_all(msg.as_bytes()).await?;
        self.writer.flush().await
    }
}

#[async_trait]
impl LineSource for CompanionConnection {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let line = self.receive_line().await?;
        if line.is_some() {
            self.send_line(ACK).await?;
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::tests::RecordingController;
    use crate::console::Command;
    use crate::playlist::PlaybackMode;
    use std::sync::Arc;

    async fn read_ack(reader: &mut BufReader<OwnedReadHalf>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_acknowledges_and_dispatches_lines() {
        let controller = Arc::new(RecordingController::default());
        let console = Arc::new(Console::new(controller.clone()));
        let server = CompanionServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let serving = {
            let console = console.clone();
            tokio::spawn(async move { server.serve(console.as_ref()).await })
        };

        let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut read = BufReader::new(read);

        // A line split over two writes, and two lines in one write
        write.write_all(b"play a.mp3\nmo").await.unwrap();
        assert_eq!(read_ack(&mut read).await, "200/OK\n");
        write.write_all(b"de loop\r\nvolume 120\n").await.unwrap();
        assert_eq!(read_ack(&mut read).await, "200/OK\n");
        assert_eq!(read_ack(&mut read).await, "200/OK\n");

        write.write_all(b"quit\n").await.unwrap();
        assert_eq!(read_ack(&mut read).await, "200/OK\n");

        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap();

        assert!(!console.is_online());
        assert_eq!(
            *controller.commands.lock().await,
            vec![
                Command::Play {
                    source: "a.mp3".to_string()
                },
                Command::Mode(PlaybackMode::Loop),
                Command::Volume(120),
            ]
        );
    }

    #[tokio::test]
    async fn test_accepts_next_companion_after_disconnect() {
        let controller = Arc::new(RecordingController::default());
        let console = Arc::new(Console::new(controller.clone()));
        let server = CompanionServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let serving = {
            let console = console.clone();
            tokio::spawn(async move { server.serve(console.as_ref()).await })
        };

        {
            let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
            let mut read = BufReader::new(read);
            write.write_all(b"pause\n").await.unwrap();
            assert_eq!(read_ack(&mut read).await, "200/OK\n");
            // Half a line, then hang up
            write.write_all(b"resu").await.unwrap();
        }

        let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut read = BufReader::new(read);
        write.write_all(b"resume\n").await.unwrap();
        assert_eq!(read_ack(&mut read).await, "200/OK\n");

        console.shutdown();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            *controller.commands.lock().await,
            vec![Command::Pause, Command::Resume]
        );
    }

    #[tokio::test]
    async fn test_send_line_appends_newline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut first = String::new();
            let mut second = String::new();
            reader.read_line(&mut first).await.unwrap();
            reader.read_line(&mut second).await.unwrap();
            (first, second)
        });

        let (stream, _) = listener.accept().await.unwrap();
        let mut connection = CompanionConnection::new(stream);
        connection.send_line("hello").await.unwrap();
        connection.send_line("done\n").await.unwrap();

        let (first, second) = client.await.unwrap();
        assert_eq!(first, "hello\n");
        assert_eq!(second, "done\n");
    }
}
