//! End-of-stream handshake.
//!
//! A stream is a run of filler bytes followed by [`TERMINATION_TOKEN`]. The
//! receiver answers with [`ACK_TOKEN`] on the same connection, which lets the
//! sender stop its clock before the connection is torn down. There is no
//! length prefix; the token is found by scanning the received bytes.

use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Marks the end of the payload.
pub const TERMINATION_TOKEN: &[u8] = b"BYE";

/// Receiver's reply to [`TERMINATION_TOKEN`].
pub const ACK_TOKEN: &[u8] = b"ACK: BYE";

/// Value of every payload byte.
pub const FILLER: u8 = b'0';

const fn token_excludes(byte: u8) -> bool {
    let mut i = 0;
    while i < TERMINATION_TOKEN.len() {
        if TERMINATION_TOKEN[i] == byte {
            return false;
        }
        i += 1;
    }
    true
}

// Substring detection is only sound while the payload cannot contain the token.
const _: () = assert!(token_excludes(FILLER));

/// Finds [`TERMINATION_TOKEN`] in a byte stream delivered in arbitrary pieces.
///
/// The last `TERMINATION_TOKEN.len() - 1` bytes of each piece are carried into
/// the next scan, so a token split across reads is still found.
///
/// # Examples
///
/// ```
/// use goodput::protocol::TokenScanner;
///
/// let mut scanner = TokenScanner::new();
/// assert_eq!(scanner.feed(b"0000B"), None);
/// assert_eq!(scanner.feed(b"YE"), Some(4));
/// ```
#[derive(Debug, Default)]
pub struct TokenScanner {
    tail: Vec<u8>,
    seen: u64,
}

impl TokenScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans the next piece of the stream.
    ///
    /// Returns the number of payload bytes that precede the token once it has
    /// been seen, or `None` while it has not.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<u64> {
        let mut window = Vec::with_capacity(self.tail.len() + chunk.len());
        window.extend_from_slice(&self.tail);
        window.extend_from_slice(chunk);
        let origin = self.seen - self.tail.len() as u64;

        if let Some(pos) = window
            .windows(TERMINATION_TOKEN.len())
            .position(|w| w == TERMINATION_TOKEN)
        {
            return Some(origin + pos as u64);
        }

        self.seen += chunk.len() as u64;
        let keep = window.len().min(TERMINATION_TOKEN.len() - 1);
        self.tail = window.split_off(window.len() - keep);
        None
    }

    /// Bytes scanned so far without finding the token.
    pub fn payload_bytes(&self) -> u64 {
        self.seen
    }
}

/// Sender side: writes the termination token.
pub async fn send_termination<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(TERMINATION_TOKEN).await?;
    writer.flush().await?;
    Ok(())
}

/// Receiver side: answers the termination token.
pub async fn send_ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(ACK_TOKEN).await?;
    writer.flush().await?;
    Ok(())
}

/// Sender side: blocks until the acknowledgment arrives.
///
/// # Errors
///
/// Returns [`Error::Handshake`] if the peer closes first and
/// [`Error::Protocol`] if it answers with anything other than [`ACK_TOKEN`].
pub async fn await_ack<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut buf = [0u8; ACK_TOKEN.len()];
    let mut filled = 0;

    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::Handshake(format!(
                "connection closed after {} of {} acknowledgment bytes",
                filled,
                ACK_TOKEN.len()
            )));
        }
        filled += n;
    }

    if buf != ACK_TOKEN {
        return Err(Error::Protocol(format!(
            "unexpected acknowledgment {:?}",
            String::from_utf8_lossy(&buf)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_values() {
        assert_eq!(TERMINATION_TOKEN, b"BYE");
        assert_eq!(ACK_TOKEN, b"ACK: BYE");
        assert!(token_excludes(FILLER));
        assert!(!token_excludes(b'Y'));
    }

    #[test]
    fn test_scanner_token_alone() {
        let mut scanner = TokenScanner::new();
        assert_eq!(scanner.feed(&[FILLER; 1000]), None);
        assert_eq!(scanner.feed(&[FILLER; 1000]), None);
        assert_eq!(scanner.feed(b"BYE"), Some(2000));
    }

    #[test]
    fn test_scanner_counts_payload_sharing_chunk_with_token() {
        let mut scanner = TokenScanner::new();
        let mut chunk = vec![FILLER; 400];
        chunk.extend_from_slice(b"BYE");
        assert_eq!(scanner.feed(&chunk), Some(400));
    }

    #[test]
    fn test_scanner_token_split_across_reads() {
        let mut scanner = TokenScanner::new();
        assert_eq!(scanner.feed(&[FILLER; 10]), None);
        assert_eq!(scanner.feed(b"00B"), None);
        assert_eq!(scanner.feed(b"Y"), None);
        assert_eq!(scanner.payload_bytes(), 14);
        assert_eq!(scanner.feed(b"E"), Some(12));
    }

    #[test]
    fn test_scanner_single_byte_reads() {
        let mut scanner = TokenScanner::new();
        for byte in b"0000BYE" {
            if let Some(payload) = scanner.feed(&[*byte]) {
                assert_eq!(payload, 4);
                return;
            }
        }
        panic!("token not detected");
    }

    #[test]
    fn test_scanner_without_token() {
        let mut scanner = TokenScanner::new();
        assert_eq!(scanner.feed(b"BY0"), None);
        assert_eq!(scanner.feed(b"YE0"), None);
        assert_eq!(scanner.feed(b""), None);
        assert_eq!(scanner.payload_bytes(), 6);
    }

    #[tokio::test]
    async fn test_ack_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(64);

        send_termination(&mut client).await.unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, TERMINATION_TOKEN);

        send_ack(&mut server).await.unwrap();
        await_ack(&mut client).await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_in_pieces() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"ACK").await.unwrap();
        let writer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            server.write_all(b": BYE").await.unwrap();
            server
        });
        await_ack(&mut client).await.unwrap();
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_ack_missing() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let result = await_ack(&mut client).await;
        assert!(matches!(result, Err(Error::Handshake(_))));
    }

    #[tokio::test]
    async fn test_ack_mismatch() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"NAK: BYE").await.unwrap();
        let result = await_ack(&mut client).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
