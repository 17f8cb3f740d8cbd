// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fetching remote and local content.

[Transport] reads `http://`, `https://` and `file://` URLs. Bare absolute
paths are treated as `file://` URLs.

HTTP requests that fail with an I/O error, a 404 or a 5xx status are retried
with a progressive backoff. Streams that break mid-transfer transparently
re-request the remainder with a `Range` header. [Transport::retrieve] resumes
partially downloaded files and falls back to a full download when the server
does not honor range requests.
*/

use {
    crate::{
        config::Configuration,
        error::{PacketaryError, Result},
        io::{digest_file, ChecksumType, DEFAULT_CHUNK_SIZE},
        package::FileChecksum,
    },
    bytes::Bytes,
    futures::{
        io::{AllowStdIo, BufReader},
        AsyncBufRead, AsyncReadExt, Stream, StreamExt, TryStreamExt,
    },
    log::{debug, warn},
    reqwest::{header::RANGE, Client, ClientBuilder, Proxy, StatusCode},
    std::{
        io::{Seek, SeekFrom, Write},
        path::Path,
        pin::Pin,
        time::Duration,
    },
    url::Url,
};

/// Default HTTP user agent string.
pub const USER_AGENT: &str = "packetary Rust crate (https://crates.io/crates/packetary)";

/// A readable stream of content.
pub type ContentStream = Pin<Box<dyn AsyncBufRead + Send>>;

type ChunkStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Convert a URL or absolute path into a [Url].
pub fn resolve_url(url: &str) -> Result<Url> {
    if url.starts_with('/') {
        Url::from_file_path(url).map_err(|_| PacketaryError::InvalidUrl(url.to_string()))
    } else {
        Ok(Url::parse(url)?)
    }
}

fn is_retryable(e: &PacketaryError) -> bool {
    match e {
        PacketaryError::Reqwest(e) => !e.is_builder(),
        PacketaryError::Io(_) => true,
        PacketaryError::HttpStatus(_, status) => *status == 404 || *status >= 500,
        _ => false,
    }
}

fn to_io_error(e: PacketaryError) -> std::io::Error {
    match e {
        PacketaryError::Io(e) => e,
        e => std::io::Error::new(std::io::ErrorKind::Other, e),
    }
}

/// Recover a range error raised while reading a resumable body.
fn from_io_error(e: std::io::Error) -> PacketaryError {
    let range_url = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<PacketaryError>())
        .and_then(|inner| match inner {
            PacketaryError::RangeNotSatisfiable(url) => Some(url.clone()),
            _ => None,
        });

    match range_url {
        Some(url) => PacketaryError::RangeNotSatisfiable(url),
        None => PacketaryError::Io(e),
    }
}

/// Fetches content with retries and resume.
///
/// Instances are cheap to clone and share one HTTP connection pool.
#[derive(Clone, Debug)]
pub struct Transport {
    client: Client,
    retries_num: u32,
    retry_interval: Duration,
}

impl Transport {
    /// Construct an instance from a [Configuration].
    ///
    /// Proxies are set up once here; the environment is not consulted.
    pub fn new(config: &Configuration) -> Result<Self> {
        let mut builder = ClientBuilder::new().user_agent(USER_AGENT).no_proxy();

        if let Some(proxy) = &config.http_proxy {
            builder = builder.proxy(Proxy::http(proxy)?);
        }
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(Proxy::https(proxy)?);
        }

        Ok(Self::new_client(
            builder.build()?,
            config.retries_num,
            Duration::from_secs(config.retry_interval),
        ))
    }

    /// Construct an instance from an existing HTTP client.
    pub fn new_client(client: Client, retries_num: u32, retry_interval: Duration) -> Self {
        Self {
            client,
            retries_num,
            retry_interval,
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.retry_interval * attempt.min(self.retries_num);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Issue a single GET request starting at `offset`.
    async fn send(&self, url: &Url, offset: u64) -> Result<ChunkStream> {
        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let res = request.send().await?;
        let status = res.status();

        // Any answer but partial content to a range request means starting over.
        if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
            debug!("{} answered {} to a range request", url, status);
            return Err(PacketaryError::RangeNotSatisfiable(url.to_string()));
        }

        if !status.is_success() {
            return Err(PacketaryError::HttpStatus(url.to_string(), status.as_u16()));
        }

        Ok(Box::pin(res.bytes_stream().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e))
        })))
    }

    /// Issue a GET request, retrying transient failures.
    async fn send_with_retries(&self, url: &Url, offset: u64) -> Result<ChunkStream> {
        let mut attempt = 0;

        loop {
            match self.send(url, offset).await {
                Ok(stream) => return Ok(stream),
                Err(e) if is_retryable(&e) => {
                    if attempt >= self.retries_num {
                        return Err(PacketaryError::RetriesExhausted(
                            url.to_string(),
                            attempt + 1,
                            e.to_string(),
                        ));
                    }

                    attempt += 1;
                    warn!(
                        "request to {} failed: {}; retrying ({}/{})",
                        url, e, attempt, self.retries_num
                    );
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Open a stream over the content at `url`, starting at byte `offset`.
    ///
    /// Fails with [PacketaryError::RangeNotSatisfiable] when `offset` is
    /// non-zero and the server answers anything but partial content.
    pub async fn open_stream(&self, url: &str, offset: u64) -> Result<ContentStream> {
        let url = resolve_url(url)?;

        if url.scheme() == "file" {
            return open_local(&url, offset);
        }

        let body = self.send_with_retries(&url, offset).await?;

        let state = ResumeState {
            transport: self.clone(),
            url,
            offset,
            attempt: 0,
            body,
        };

        let stream = futures::stream::try_unfold(state, next_chunk);

        Ok(Box::pin(Box::pin(stream).into_async_read()))
    }

    /// Download `url` into `path`.
    ///
    /// An existing file of exactly `size` bytes is kept as is. A shorter one is
    /// resumed. When checksums are given, the final file is verified against
    /// them and removed if it does not match. Returns the number of bytes
    /// written.
    pub async fn retrieve(
        &self,
        url: &str,
        path: &Path,
        size: i64,
        checksum: &FileChecksum,
    ) -> Result<u64> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PacketaryError::IoPath(format!("{}", parent.display()), e))?;
        }

        let existing = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let offset = if size >= 0 {
            if existing == size as u64 && path.exists() {
                debug!("{} is up to date", path.display());
                return Ok(0);
            }

            if existing < size as u64 {
                existing
            } else {
                0
            }
        } else {
            0
        };

        let written = match self.download(url, path, offset).await {
            Err(PacketaryError::RangeNotSatisfiable(_)) => {
                warn!("Failed to resume, starting from the beginning");
                self.download(url, path, 0).await?
            }
            res => res?,
        };

        if let Err(e) = verify_file(path, size, checksum) {
            // A corrupt file of the right size would pass for up to date later.
            std::fs::remove_file(path)
                .map_err(|e| PacketaryError::IoPath(format!("{}", path.display()), e))?;
            return Err(e);
        }
        debug!("retrieved {} ({} bytes)", url, written);

        Ok(written)
    }

    async fn download(&self, url: &str, path: &Path, offset: u64) -> Result<u64> {
        let mut reader = self.open_stream(url, offset).await?;

        let io_error = |e| PacketaryError::IoPath(format!("{}", path.display()), e);

        let mut fh = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(io_error)?;
        fh.set_len(offset).map_err(io_error)?;
        fh.seek(SeekFrom::Start(offset)).map_err(io_error)?;

        let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];
        let mut written = 0u64;

        loop {
            let count = reader.read(&mut buffer).await.map_err(from_io_error)?;
            if count == 0 {
                break;
            }

            fh.write_all(&buffer[0..count]).map_err(io_error)?;
            written += count as u64;
        }

        fh.sync_all().map_err(io_error)?;

        Ok(written)
    }
}

struct ResumeState {
    transport: Transport,
    url: Url,
    offset: u64,
    attempt: u32,
    body: ChunkStream,
}

/// Produce the next chunk of a resumable body.
///
/// A failed read re-requests the content from the current offset.
async fn next_chunk(mut state: ResumeState) -> std::io::Result<Option<(Bytes, ResumeState)>> {
    loop {
        match state.body.next().await {
            Some(Ok(chunk)) => {
                state.offset += chunk.len() as u64;
                return Ok(Some((chunk, state)));
            }
            None => return Ok(None),
            Some(Err(e)) => {
                if state.attempt >= state.transport.retries_num {
                    return Err(e);
                }

                state.attempt += 1;
                warn!(
                    "reading {} failed at offset {}: {}; resuming",
                    state.url, state.offset, e
                );
                state.transport.backoff(state.attempt).await;
                state.body = state
                    .transport
                    .send_with_retries(&state.url, state.offset)
                    .await
                    .map_err(to_io_error)?;
            }
        }
    }
}

fn open_local(url: &Url, offset: u64) -> Result<ContentStream> {
    let path = url
        .to_file_path()
        .map_err(|_| PacketaryError::InvalidUrl(url.to_string()))?;

    let mut f = std::fs::File::open(&path)
        .map_err(|e| PacketaryError::IoPath(format!("{}", path.display()), e))?;
    f.seek(SeekFrom::Start(offset))?;

    Ok(Box::pin(BufReader::new(AllowStdIo::new(f))))
}

/// Verify size and digests of a downloaded file.
fn verify_file(path: &Path, size: i64, checksum: &FileChecksum) -> Result<()> {
    let expected = [
        (ChecksumType::Md5, &checksum.md5),
        (ChecksumType::Sha1, &checksum.sha1),
        (ChecksumType::Sha256, &checksum.sha256),
    ]
    .into_iter()
    .filter_map(|(t, v)| v.as_ref().map(|v| (t, v)))
    .collect::<Vec<_>>();

    let types = expected.iter().map(|(t, _)| *t).collect::<Vec<_>>();
    let (actual_size, digests) = digest_file(path, &types, DEFAULT_CHUNK_SIZE)?;

    if size >= 0 && actual_size != size as u64 {
        return Err(PacketaryError::SizeMismatch(
            format!("{}", path.display()),
            size as u64,
            actual_size,
        ));
    }

    for ((_, wanted), got) in expected.into_iter().zip(digests) {
        if !wanted.eq_ignore_ascii_case(&got) {
            return Err(PacketaryError::DigestMismatch(
                format!("{}", path.display()),
                wanted.clone(),
                got,
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::io::MultiDigester,
        wiremock::{
            matchers::{header, method, path as url_path},
            Mock, MockServer, ResponseTemplate,
        },
    };

    const SIZE: usize = 12288;

    fn content() -> Vec<u8> {
        (0..SIZE).map(|i| (i % 251) as u8).collect()
    }

    fn checksum(data: &[u8]) -> FileChecksum {
        let mut digester = MultiDigester::new(&[ChecksumType::Sha256]);
        digester.update(data);

        FileChecksum {
            sha256: digester.finish().pop(),
            ..Default::default()
        }
    }

    fn transport() -> Transport {
        Transport::new(&Configuration {
            retries_num: 2,
            retry_interval: 0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn paths_become_file_urls() -> Result<()> {
        assert_eq!(resolve_url("/srv/repo")?.as_str(), "file:///srv/repo");
        assert_eq!(
            resolve_url("http://example.com/x")?.as_str(),
            "http://example.com/x"
        );
        assert!(resolve_url("not a url").is_err());

        Ok(())
    }

    #[tokio::test]
    async fn resume_partial_download() -> Result<()> {
        let data = content();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(url_path("/pool/p.deb"))
            .and(header("Range", "bytes=4096-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 4096-12287/12288")
                    .set_body_bytes(data[4096..].to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let td = tempfile::tempdir()?;
        let dest = td.path().join("pool").join("p.deb");
        std::fs::create_dir_all(dest.parent().unwrap())?;
        std::fs::write(&dest, &data[0..4096])?;

        let written = transport()
            .retrieve(
                &format!("{}/pool/p.deb", server.uri()),
                &dest,
                SIZE as i64,
                &checksum(&data),
            )
            .await?;

        assert_eq!(written, 8192);
        assert_eq!(std::fs::read(&dest)?, data);

        Ok(())
    }

    #[tokio::test]
    async fn restart_when_range_unsupported() -> Result<()> {
        let data = content();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(url_path("/p.deb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .expect(2)
            .mount(&server)
            .await;

        let td = tempfile::tempdir()?;
        let dest = td.path().join("p.deb");
        std::fs::write(&dest, &data[0..4096])?;

        let written = transport()
            .retrieve(
                &format!("{}/p.deb", server.uri()),
                &dest,
                SIZE as i64,
                &checksum(&data),
            )
            .await?;

        assert_eq!(written, SIZE as u64);
        assert_eq!(std::fs::metadata(&dest)?.len(), SIZE as u64);
        assert_eq!(std::fs::read(&dest)?, data);

        Ok(())
    }

    #[tokio::test]
    async fn complete_file_is_untouched() -> Result<()> {
        let data = content();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let td = tempfile::tempdir()?;
        let dest = td.path().join("p.deb");
        std::fs::write(&dest, &data)?;

        let written = transport()
            .retrieve(
                &format!("{}/p.deb", server.uri()),
                &dest,
                SIZE as i64,
                &FileChecksum::default(),
            )
            .await?;
        assert_eq!(written, 0);

        Ok(())
    }

    #[tokio::test]
    async fn retries_server_errors() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload\n"))
            .expect(1)
            .mount(&server)
            .await;

        let mut stream = transport()
            .open_stream(&format!("{}/Release", server.uri()), 0)
            .await?;
        let mut s = String::new();
        stream.read_to_string(&mut s).await?;
        assert_eq!(s, "payload\n");

        Ok(())
    }

    #[tokio::test]
    async fn gives_up_and_rejects_fatal_statuses() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(url_path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let t = transport();

        assert!(matches!(
            t.open_stream(&format!("{}/missing", server.uri()), 0).await,
            Err(PacketaryError::RetriesExhausted(_, 3, _))
        ));
        assert!(matches!(
            t.open_stream(&format!("{}/forbidden", server.uri()), 0).await,
            Err(PacketaryError::HttpStatus(_, 403))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn local_files() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source = td.path().join("source.bin");
        std::fs::write(&source, content())?;

        let mut stream = transport()
            .open_stream(&format!("{}", source.display()), 12000)
            .await?;
        let mut tail = vec![];
        stream.read_to_end(&mut tail).await?;
        assert_eq!(tail, content()[12000..].to_vec());

        let dest = td.path().join("copy").join("dest.bin");
        let written = transport()
            .retrieve(
                &format!("{}", source.display()),
                &dest,
                -1,
                &checksum(&content()),
            )
            .await?;
        assert_eq!(written, SIZE as u64);

        let bad = FileChecksum {
            md5: Some("00".repeat(16)),
            ..Default::default()
        };
        std::fs::remove_file(&dest)?;
        assert!(matches!(
            transport()
                .retrieve(&format!("{}", source.display()), &dest, -1, &bad)
                .await,
            Err(PacketaryError::DigestMismatch(..))
        ));
        assert!(!dest.exists());

        Ok(())
    }

    #[tokio::test]
    async fn corrupt_download_is_not_kept() -> Result<()> {
        let data = content();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(url_path("/p.deb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .expect(2)
            .mount(&server)
            .await;

        let td = tempfile::tempdir()?;
        let dest = td.path().join("p.deb");
        let url = format!("{}/p.deb", server.uri());
        let bad = FileChecksum {
            md5: Some("00".repeat(16)),
            ..Default::default()
        };

        for _ in 0..2 {
            assert!(matches!(
                transport().retrieve(&url, &dest, SIZE as i64, &bad).await,
                Err(PacketaryError::DigestMismatch(..))
            ));
            assert!(!dest.exists());
        }

        Ok(())
    }

    #[tokio::test]
    async fn restart_when_range_rejected() -> Result<()> {
        let data = content();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(url_path("/p.deb"))
            .and(header("Range", "bytes=4096-"))
            .respond_with(ResponseTemplate::new(416))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/p.deb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let td = tempfile::tempdir()?;
        let dest = td.path().join("p.deb");
        std::fs::write(&dest, &data[0..4096])?;

        let written = transport()
            .retrieve(
                &format!("{}/p.deb", server.uri()),
                &dest,
                SIZE as i64,
                &checksum(&data),
            )
            .await?;

        assert_eq!(written, SIZE as u64);
        assert_eq!(std::fs::read(&dest)?, data);

        Ok(())
    }

    #[tokio::test]
    async fn broken_body_resumes_at_offset() -> Result<()> {
        let data = content();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(url_path("/p.deb"))
            .and(header("Range", "bytes=4096-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 4096-12287/12288")
                    .set_body_bytes(data[4096..].to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let body: ChunkStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from(data[0..4096].to_vec())),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )),
        ]));

        let state = ResumeState {
            transport: transport(),
            url: Url::parse(&format!("{}/p.deb", server.uri()))?,
            offset: 0,
            attempt: 0,
            body,
        };

        let mut reader = Box::pin(futures::stream::try_unfold(state, next_chunk)).into_async_read();
        let mut received = vec![];
        reader.read_to_end(&mut received).await?;

        assert_eq!(received, data);

        Ok(())
    }
}
