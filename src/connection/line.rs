use std::{io, pin::Pin, task::{Context, Poll}, time::Duration};
use bytes::{Buf, BytesMut};
use pin_project_lite::pin_project;
use tokio::{io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf}, net::TcpStream, time};
use tokio_rustls::server::TlsStream;
use super::errors::{ConnError, ErrorKind};

pub type SecuredStream = TlsStream<TcpStream>;

pin_project! {
    #[project = SocketProj]
    pub enum SocketConnection {
        Plain { #[pin] stream: TcpStream },
        Secure { #[pin] stream: SecuredStream },
    }
}

impl SocketConnection {
    pub fn plain(stream: TcpStream) -> Self {
        Self::Plain { stream }
    }

    pub fn secure(stream: SecuredStream) -> Self {
        Self::Secure { stream }
    }
}

impl AsyncRead for SocketConnection {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            SocketProj::Plain { stream } => stream.poll_read(cx, buf),
            SocketProj::Secure { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketConnection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.project() {
            SocketProj::Plain { stream } => stream.poll_write(cx, buf),
            SocketProj::Secure { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            SocketProj::Plain { stream } => stream.poll_flush(cx),
            SocketProj::Secure { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            SocketProj::Plain { stream } => stream.poll_shutdown(cx),
            SocketProj::Secure { stream } => stream.poll_shutdown(cx),
        }
    }
}

/// Splits an inbound byte stream into lines ended by `\n`, `\r\n` or a lone `\r`.
pub struct LineReader<R> {
    reader: R,
    buffer: BytesMut,
    max_len: usize,
    timeout: Option<Duration>,
    eof: bool,
    // last line ended at `\r`, a `\n` right after it belongs to that line
    skip_lf: bool,
}

impl<R> LineReader<R>
    where R: AsyncRead + Unpin
{
    pub fn new(reader: R, max_len: usize, timeout: Option<Duration>) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(1024),
            max_len,
            timeout,
            eof: false,
            skip_lf: false,
        }
    }

    /// Next line without its terminator, `None` once the peer closed.
    /// A trailing fragment without terminator still counts as a line.
    pub async fn read_line(&mut self) -> Result<Option<BytesMut>, ConnError> {
        loop {
            if self.skip_lf && !self.buffer.is_empty() {
                if self.buffer[0] == b'\n' {
                    self.buffer.advance(1);
                }
                self.skip_lf = false;
            }

            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n' || *b == b'\r') {
                if pos > self.max_len {
                    return Err(self.too_long());
                }
                let mut line = self.buffer.split_to(pos + 1);
                self.skip_lf = line[pos] == b'\r';
                line.truncate(pos);
                return Ok(Some(line));
            }

            if self.buffer.len() > self.max_len {
                return Err(self.too_long());
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let len = self.buffer.len();
                let line = self.buffer.split_to(len);
                return Ok(Some(line));
            }

            self.fill().await?;
        }
    }

    fn too_long(&self) -> ConnError {
        ConnError::new(
            ErrorKind::InvalidData,
            Some(format!("line exceeds {} bytes", self.max_len))
        )
    }

    async fn fill(&mut self) -> Result<(), ConnError> {
        self.buffer.reserve(1024);
        let read = match self.timeout {
            None => self.reader.read_buf(&mut self.buffer).await,
            Some(t) => match time::timeout(t, self.reader.read_buf(&mut self.buffer)).await {
                Ok(r) => r,
                Err(_) => return Err(ConnError::new(ErrorKind::TimedOut, Some(String::from("read timeout")))),
            }
        };

        match read {
            Ok(0) => {
                self.eof = true;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) => Err(ConnError::from(err)),
        }
    }

    /// Bytes buffered past the last returned line.
    pub fn pending(&self) -> usize {
        self.buffer.remaining()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};
    use crate::connection::errors::ErrorKind;
    use super::LineReader;

    #[tokio::test]
    async fn splits_lines_and_strips_crlf() {
        let (mut tx, rx) = duplex(256);
        tx.write_all(b"LINE 0,0,1,1\nCLEAR\r\nCOLOR 0x").await.unwrap();
        tx.write_all(b"ff0000ff\n").await.unwrap();
        drop(tx);

        let mut reader = LineReader::new(rx, 1024, None);
        assert_eq!(&reader.read_line().await.unwrap().unwrap()[..], b"LINE 0,0,1,1");
        assert_eq!(&reader.read_line().await.unwrap().unwrap()[..], b"CLEAR");
        assert_eq!(&reader.read_line().await.unwrap().unwrap()[..], b"COLOR 0xff0000ff");
        assert!(reader.read_line().await.unwrap().is_none());
        assert_eq!(reader.pending(), 0);
    }

    #[tokio::test]
    async fn lone_carriage_return_ends_a_line() {
        let (mut tx, rx) = duplex(256);
        tx.write_all(b"CLEAR\rLINE 1,1,2,2\r").await.unwrap();
        tx.write_all(b"\nCOLOR 0x000000ff\r\r\n").await.unwrap();
        drop(tx);

        let mut reader = LineReader::new(rx, 64, None);
        assert_eq!(&reader.read_line().await.unwrap().unwrap()[..], b"CLEAR");
        assert_eq!(&reader.read_line().await.unwrap().unwrap()[..], b"LINE 1,1,2,2");
        assert_eq!(&reader.read_line().await.unwrap().unwrap()[..], b"COLOR 0x000000ff");
        assert!(reader.read_line().await.unwrap().unwrap().is_empty());
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn carriage_return_does_not_wait_for_next_byte() {
        let (mut tx, rx) = duplex(64);
        tx.write_all(b"CLEAR\r").await.unwrap();

        let mut reader = LineReader::new(rx, 64, Some(Duration::from_millis(500)));
        assert_eq!(&reader.read_line().await.unwrap().unwrap()[..], b"CLEAR");
        drop(tx);
    }

    #[tokio::test]
    async fn keeps_empty_lines() {
        let (mut tx, rx) = duplex(64);
        tx.write_all(b"\n\n").await.unwrap();
        drop(tx);

        let mut reader = LineReader::new(rx, 64, None);
        assert!(reader.read_line().await.unwrap().unwrap().is_empty());
        assert!(reader.read_line().await.unwrap().unwrap().is_empty());
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trailing_fragment_is_a_line() {
        let (mut tx, rx) = duplex(64);
        tx.write_all(b"CLEAR").await.unwrap();
        drop(tx);

        let mut reader = LineReader::new(rx, 64, None);
        assert_eq!(&reader.read_line().await.unwrap().unwrap()[..], b"CLEAR");
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn over_long_line_fails() {
        let (mut tx, rx) = duplex(256);
        tx.write_all(&[b'a'; 100]).await.unwrap();

        let mut reader = LineReader::new(rx, 16, None);
        let err = reader.read_line().await.unwrap_err();
        assert_eq!(err.get_kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn over_long_line_with_terminator_in_same_chunk_fails() {
        let (mut tx, rx) = duplex(256);
        let mut chunk = vec![b'a'; 100];
        chunk.push(b'\n');
        tx.write_all(&chunk).await.unwrap();

        let mut reader = LineReader::new(rx, 16, None);
        let err = reader.read_line().await.unwrap_err();
        assert_eq!(err.get_kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn line_at_exact_limit_passes() {
        let (mut tx, rx) = duplex(256);
        let mut chunk = vec![b'a'; 16];
        chunk.extend_from_slice(b"\r\n");
        tx.write_all(&chunk).await.unwrap();
        drop(tx);

        let mut reader = LineReader::new(rx, 16, None);
        assert_eq!(reader.read_line().await.unwrap().unwrap().len(), 16);
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_timeout_fails() {
        let (_tx, rx) = duplex(64);
        let mut reader = LineReader::new(rx, 64, Some(Duration::from_millis(20)));
        let err = reader.read_line().await.unwrap_err();
        assert_eq!(err.get_kind(), ErrorKind::TimedOut);
    }
}
