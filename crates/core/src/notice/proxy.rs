// crates/core/src/notice/proxy.rs
//! Reader/writer wrappers that count every byte moved into a [`Progress`].

use std::io::{self, IoSlice, Read, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, ReadBuf};

use super::progress::Progress;

/// Reader that calls [`Progress::done`] with the size of every successful read.
///
/// Dropping the wrapper drops, and so closes, the inner reader.
#[derive(Debug)]
pub struct ProxyReader<R> {
    inner: R,
    progress: Arc<Progress>,
}

impl<R> ProxyReader<R> {
    pub fn new(inner: R, progress: Arc<Progress>) -> Self {
        Self { inner, progress }
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> ProxyReader<R> {
    /// Copy everything left in the reader to `writer` using the inner
    /// reader's own copy path, reporting the byte count once at the end.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let n = tokio::io::copy(&mut self.inner, writer).await?;
        self.progress.done(n as i64);
        Ok(n)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProxyReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;
        if n > 0 {
            this.progress.done(n as i64);
        }
        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncBufRead + Unpin> AsyncBufRead for ProxyReader<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        Pin::new(&mut this.inner).consume(amt);
        if amt > 0 {
            this.progress.done(amt as i64);
        }
    }
}

impl<R: Read> Read for ProxyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.progress.done(n as i64);
        }
        Ok(n)
    }
}

/// Writer that calls [`Progress::done`] with the size of every successful write.
///
/// `shutdown` is forwarded to the inner writer; dropping the wrapper drops
/// the inner writer.
#[derive(Debug)]
pub struct ProxyWriter<W> {
    inner: W,
    progress: Arc<Progress>,
}

impl<W> ProxyWriter<W> {
    pub fn new(inner: W, progress: Arc<Progress>) -> Self {
        Self { inner, progress }
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> ProxyWriter<W> {
    /// Drain `reader` into the inner writer in one bulk copy, reporting the
    /// byte count once at the end.
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let n = tokio::io::copy(reader, &mut self.inner).await?;
        self.progress.done(n as i64);
        Ok(n)
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProxyWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        if n > 0 {
            this.progress.done(n as i64);
        }
        Poll::Ready(Ok(n))
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = ready!(Pin::new(&mut this.inner).poll_write_vectored(cx, bufs))?;
        if n > 0 {
            this.progress.done(n as i64);
        }
        Poll::Ready(Ok(n))
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<W: Write> Write for ProxyWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.progress.done(n as i64);
        }
        Ok(n)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let n = self.inner.write_vectored(bufs)?;
        if n > 0 {
            self.progress.done(n as i64);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

    use super::{Progress, ProxyReader, ProxyWriter};

    fn progress(total: i64) -> Arc<Progress> {
        let p = Arc::new(Progress::new());
        p.add(total);
        p
    }

    #[tokio::test]
    async fn test_async_reader_counts_bytes() {
        let data = vec![7u8; 10_000];
        let p = progress(data.len() as i64);
        let mut reader = ProxyReader::new(&data[..], Arc::clone(&p));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
        assert_eq!(p.finished(), 10_000);
        assert_eq!(p.calc_percent(), 100.0);
    }

    #[tokio::test]
    async fn test_async_buf_reader_counts_consumed() {
        let p = progress(12);
        let mut reader = ProxyReader::new(&b"line one\nend"[..], Arc::clone(&p));

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "line one\n");
        assert_eq!(p.finished(), 9);
    }

    #[tokio::test]
    async fn test_async_writer_counts_bytes_and_shuts_down() {
        let p = progress(5);
        let (client, mut server) = tokio::io::duplex(64);
        let mut writer = ProxyWriter::new(client, Arc::clone(&p));

        writer.write_all(b"hello").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
        assert_eq!(p.finished(), 5);
    }

    #[tokio::test]
    async fn test_copy_to_reports_once() {
        let data = vec![1u8; 4096];
        let p = progress(data.len() as i64);
        let mut reader = ProxyReader::new(&data[..], Arc::clone(&p));

        let mut sink: Vec<u8> = Vec::new();
        let n = reader.copy_to(&mut sink).await.unwrap();
        assert_eq!(n, 4096);
        assert_eq!(sink.len(), 4096);
        assert_eq!(p.finished(), 4096);
    }

    #[tokio::test]
    async fn test_copy_from() {
        let p = progress(3);
        let mut writer = ProxyWriter::new(Vec::new(), Arc::clone(&p));
        let mut src: &[u8] = b"abc";
        assert_eq!(writer.copy_from(&mut src).await.unwrap(), 3);
        assert_eq!(writer.get_ref(), b"abc");
        assert_eq!(p.finished(), 3);
    }

    #[test]
    fn test_sync_reader_and_writer() {
        let p = progress(6);
        let mut reader = ProxyReader::new(&b"abc"[..], Arc::clone(&p));
        let mut writer = ProxyWriter::new(Vec::new(), Arc::clone(&p));

        std::io::copy(&mut reader, &mut writer).unwrap();
        assert_eq!(writer.into_inner(), b"abc");
        // Both sides of the copy counted into the same progress.
        assert_eq!(p.finished(), 6);
    }

    #[tokio::test]
    async fn test_empty_reads_do_not_advance() {
        let p = progress(1);
        let mut reader = ProxyReader::new(&b""[..], Arc::clone(&p));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(p.finished(), 0);
    }
}
