//! # Summary
//!
//! Small line-protocol helpers for the harness's two kinds of persistent
//! outbound connections: one per server (`ALLCLEAR`/`TIMEBOMBLEADER`,
//! mirroring `paxos::thread::control`) and one per client
//! (`SENDMESSAGE`/`PRINTCHATLOG`, mirroring `chatroom::control`).

use tokio::io::{AsyncRead, AsyncReadExt};

use paxos::wire::MESSAGE_DELIM;

/// Reads one `<MD>`-delimited frame from `reader`, or `None` on EOF.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == MESSAGE_DELIM as u8) {
            let frame: Vec<u8> = buf.drain(..=pos).collect();
            return Ok(Some(String::from_utf8_lossy(&frame[..frame.len() - 1]).into_owned()));
        }
        let mut chunk = [0u8; 256];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
