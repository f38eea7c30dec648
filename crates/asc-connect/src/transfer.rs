//! Byte transfer and checksum primitives for asset uploads

use std::io::SeekFrom;
use std::path::Path;

use md5::{Digest, Md5};
use reqwest::{Client, Method};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::error::{ConnectError, Result};
use crate::types::UploadOperation;

const CHECKSUM_CHUNK: usize = 64 * 1024;

/// Sends each byte range of `path` as described by its upload operation.
///
/// Operations are executed in order, one request per operation.
pub async fn execute_upload_operations(
    http: &Client,
    operations: &[UploadOperation],
    path: &Path,
) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let file_len = file.metadata().await?.len();

    for (index, op) in operations.iter().enumerate() {
        let end = op.offset.checked_add(op.length).unwrap_or(u64::MAX);
        if end > file_len {
            return Err(ConnectError::Transfer(format!(
                "operation {} covers bytes {}..{} but {} is only {} bytes",
                index,
                op.offset,
                end,
                path.display(),
                file_len
            )));
        }

        let length = usize::try_from(op.length).map_err(|_| {
            ConnectError::Transfer(format!("operation {} length {} too large", index, op.length))
        })?;
        let mut chunk = vec![0u8; length];
        file.seek(SeekFrom::Start(op.offset)).await?;
        file.read_exact(&mut chunk).await?;

        let method = Method::from_bytes(op.method.as_bytes()).map_err(|_| {
            ConnectError::Transfer(format!("invalid HTTP method {:?}", op.method))
        })?;

        let mut request = http.request(method, &op.url).body(chunk);
        for header in &op.request_headers {
            request = request.header(header.name.as_str(), header.value.as_str());
        }

        debug!(index, offset = op.offset, length = op.length, "sending upload chunk");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectError::Transfer(format!(
                "chunk at offset {} rejected with {}: {}",
                op.offset, status, body
            )));
        }
    }

    Ok(())
}

/// MD5 hex digest of everything `reader` yields.
pub async fn md5_hex<R>(mut reader: R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHECKSUM_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// MD5 hex digest of a file's contents.
pub async fn md5_file(path: &Path) -> Result<String> {
    let file = tokio::fs::File::open(path).await?;
    Ok(md5_hex(file).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpHeader;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    #[derive(Debug)]
    struct Received {
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    impl Received {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    async fn read_request(stream: &mut TcpStream) -> Received {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap().split(' ');
        let method = request_line.next().unwrap().to_string();
        let path = request_line.next().unwrap().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        let length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.parse::<usize>().unwrap())
            .unwrap_or(0);
        let mut body = buf[head_end..].to_vec();
        while body.len() < length {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-body");
            body.extend_from_slice(&chunk[..n]);
        }

        Received {
            method,
            path,
            headers,
            body,
        }
    }

    /// Answers `requests` requests with `status`, one connection each.
    async fn serve(status: u16, requests: usize) -> (String, JoinHandle<Vec<Received>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut received = Vec::new();
            for _ in 0..requests {
                let (mut stream, _) = listener.accept().await.unwrap();
                received.push(read_request(&mut stream).await);
                let body = if status < 300 { "" } else { "storage refused" };
                let response = format!(
                    "HTTP/1.1 {} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            received
        });

        (base, handle)
    }

    fn http() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    fn operation(base: &str, part: usize, offset: u64, length: u64) -> UploadOperation {
        UploadOperation {
            method: "PUT".to_string(),
            url: format!("{}/part/{}", base, part),
            offset,
            length,
            request_headers: vec![
                HttpHeader {
                    name: "Content-Type".to_string(),
                    value: "image/png".to_string(),
                },
                HttpHeader {
                    name: "x-amz-meta-part".to_string(),
                    value: part.to_string(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_operations_send_their_byte_ranges() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shot.png");
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &data).unwrap();

        let (base, server) = serve(200, 2).await;
        let ops = vec![operation(&base, 1, 0, 600), operation(&base, 2, 600, 400)];

        execute_upload_operations(&http(), &ops, &path).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.len(), 2);
        for (req, op) in received.iter().zip(&ops) {
            let start = op.offset as usize;
            let end = start + op.length as usize;
            assert_eq!(req.method, "PUT");
            assert_eq!(req.body, &data[start..end]);
            assert_eq!(req.header("content-type"), Some("image/png"));
        }
        assert_eq!(received[0].path, "/part/1");
        assert_eq!(received[0].header("x-amz-meta-part"), Some("1"));
        assert_eq!(received[1].path, "/part/2");
        assert_eq!(received[1].header("x-amz-meta-part"), Some("2"));
    }

    #[tokio::test]
    async fn test_rejected_chunk_stops_transfer() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shot.png");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        let (base, server) = serve(500, 1).await;
        let ops = vec![operation(&base, 1, 0, 50), operation(&base, 2, 50, 50)];

        let err = execute_upload_operations(&http(), &ops, &path)
            .await
            .unwrap_err();
        match err {
            ConnectError::Transfer(message) => {
                assert!(message.contains("offset 0"), "{}", message);
                assert!(message.contains("500"), "{}", message);
                assert!(message.contains("storage refused"), "{}", message);
            }
            other => panic!("expected transfer error, got {:?}", other),
        }

        // The second operation is never sent
        let received = server.await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body.len(), 50);
    }

    #[tokio::test]
    async fn test_md5_known_values() {
        assert_eq!(
            md5_hex(&b""[..]).await.unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            md5_hex(&b"hello world"[..]).await.unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[tokio::test]
    async fn test_md5_file_spanning_chunks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        let data = vec![7u8; CHECKSUM_CHUNK * 2 + 13];
        std::fs::write(&path, &data).unwrap();

        let streamed = md5_file(&path).await.unwrap();
        let direct = format!("{:x}", Md5::digest(&data));
        assert_eq!(streamed, direct);
    }

    #[tokio::test]
    async fn test_operation_past_end_of_file_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shot.png");
        std::fs::write(&path, b"0123456789").unwrap();

        let ops = vec![UploadOperation {
            method: "PUT".to_string(),
            url: "http://127.0.0.1:9/upload".to_string(),
            offset: 5,
            length: 10,
            request_headers: vec![],
        }];

        let err = execute_upload_operations(&Client::new(), &ops, &path)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Transfer(_)));
    }
}
