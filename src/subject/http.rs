//! Minimal HTTP/1.1 framing for the subject server and test peers.
//! One request per connection, JSON bodies only.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on accepted request bodies
const MAX_BODY: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Read one request. `None` when the peer closed without sending anything.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<HttpRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let method = parts.next().context("Missing HTTP method")?.to_string();
    let path = parts.next().context("Missing HTTP path")?.to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .context("Invalid Content-Length header")?;
            }
        }
    }

    if content_length > MAX_BODY {
        anyhow::bail!("Request body of {} bytes is too large", content_length);
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    Ok(Some(HttpRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).to_string(),
    }))
}

/// Write a JSON response and signal the connection will close
pub async fn write_response<W>(writer: &mut W, status: u16, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let http_response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason_phrase(status),
        body.len(),
        body
    );
    writer.write_all(http_response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}
