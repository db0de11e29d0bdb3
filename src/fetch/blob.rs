// src/fetch/blob.rs
use futures::{
    future::{BoxFuture, FutureExt, Shared},
    StreamExt,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
    sync::Mutex,
    time::Instant,
};
use tracing::{debug, info, instrument, warn};

use super::{open_stream, LocationResolver, Transfer};
use crate::error::{LookupError, Result};

/// Write buffer for the cache file; memory use stays at this regardless of
/// how large the artifact is.
const WRITE_CHUNK_BYTES: usize = 1024 * 1024;

type Flight = Shared<BoxFuture<'static, Result<()>>>;

/// A download is shared only by callers asking for the same dataset at the
/// same destination.
type FlightKey = (String, PathBuf);

/// Keeps one large artifact per (dataset id, destination) on local disk,
/// downloading it at most once. Cloning is cheap and clones share in-flight
/// downloads.
#[derive(Clone)]
pub struct BlobCache {
    inner: Arc<Inner>,
}

struct Inner {
    resolver: Arc<dyn LocationResolver>,
    transfer: Arc<dyn Transfer>,
    timeout: Option<Duration>,
    inflight: Mutex<HashMap<FlightKey, Flight>>,
}

impl BlobCache {
    pub fn new(resolver: Arc<dyn LocationResolver>, transfer: Arc<dyn Transfer>) -> Self {
        Self::with_timeout(resolver, transfer, None)
    }

    /// Bound the whole download (both requests plus streaming to disk).
    pub fn with_timeout(
        resolver: Arc<dyn LocationResolver>,
        transfer: Arc<dyn Transfer>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                transfer,
                timeout,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Make sure `dataset_id` is present at `dest`.
    ///
    /// Returns at once when the file exists. Otherwise exactly one download
    /// per (dataset id, destination) runs; concurrent callers wait for it and
    /// all get its result.
    #[instrument(level = "info", skip(self, dest), fields(dest = %dest.as_ref().display()))]
    pub async fn ensure(&self, dataset_id: &str, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        if fs::try_exists(dest).await? {
            debug!("cache hit");
            return Ok(());
        }

        let key: FlightKey = (dataset_id.to_string(), dest.to_path_buf());
        let flight = {
            let mut inflight = self.inner.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| {
                    download(self.inner.clone(), dataset_id.to_string(), dest.to_path_buf())
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let outcome = flight.clone().await;

        let mut inflight = self.inner.inflight.lock().await;
        if inflight
            .get(&key)
            .map(|current| current.ptr_eq(&flight))
            .unwrap_or(false)
        {
            inflight.remove(&key);
        }
        outcome
    }
}

async fn download(inner: Arc<Inner>, dataset_id: String, dest: PathBuf) -> Result<()> {
    // Another flight may have finished between our existence check and now.
    if fs::try_exists(&dest).await? {
        return Ok(());
    }

    let url = inner
        .resolver
        .resolve(&dataset_id)
        .await
        .map_err(|e| LookupError::Download(e.to_string()))?;
    info!(dataset = %dataset_id, %url, "downloading");

    let start = Instant::now();
    let work = fetch_to_file(inner.transfer.as_ref(), &url, &dest);
    let written = match inner.timeout {
        Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
            warn!(dataset = %dataset_id, ?limit, "download timed out");
            LookupError::Timeout {
                limit,
                during: format!("downloading {}", dataset_id),
            }
        })??,
        None => work.await?,
    };

    info!(dataset = %dataset_id, bytes = written, elapsed = ?start.elapsed(), "downloaded");
    Ok(())
}

/// Stream the content at `url` into a temp file next to `dest`, then rename
/// it into place. A failed or interrupted transfer leaves nothing at `dest`.
async fn fetch_to_file(transfer: &dyn Transfer, url: &url::Url, dest: &Path) -> Result<u64> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let mut body = open_stream(transfer, url).await?;

    let tmp = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(".cuilookup-")
            .suffix(".part")
            .tempfile_in(&parent)
    })
    .await
    .map_err(|e| LookupError::Download(format!("creating temp file: {}", e)))??;
    let (file, tmp_path) = tmp.into_parts();
    let mut writer = BufWriter::with_capacity(WRITE_CHUNK_BYTES, fs::File::from_std(file));

    let mut total = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| LookupError::Download(format!("reading {}: {}", url, e)))?;
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || tmp_path.persist(dest))
        .await
        .map_err(|e| LookupError::Download(format!("renaming into place: {}", e)))?
        .map_err(|e| LookupError::from(e.error))?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{BodyStream, Confirmation, Fetched};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex as StdMutex,
    };
    use tempfile::TempDir;
    use url::Url;

    const CONTENT: &[u8] = b"CUI,DENUMIRE\n123,ALFA SRL\n1234,BETA SA\n";

    struct StaticResolver;

    #[async_trait]
    impl LocationResolver for StaticResolver {
        async fn resolve(&self, dataset_id: &str) -> Result<Url> {
            Url::parse(&format!("https://blobs.test/uc?id={}", dataset_id))
                .map_err(|e| LookupError::resolution(dataset_id, e))
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl LocationResolver for FailingResolver {
        async fn resolve(&self, dataset_id: &str) -> Result<Url> {
            Err(LookupError::resolution(dataset_id, "catalog unreachable"))
        }
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Content,
        TokenThenContent,
        BrokenStream,
        Hang,
    }

    struct FakeTransfer {
        behaviour: Behaviour,
        calls: AtomicUsize,
        urls: StdMutex<Vec<Url>>,
        delay: Duration,
    }

    impl FakeTransfer {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
                urls: StdMutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn chunked(content: &'static [u8]) -> BodyStream {
        stream::iter(content.chunks(7).map(|c| Ok(c.to_vec()))).boxed()
    }

    #[async_trait]
    impl Transfer for FakeTransfer {
        async fn get(&self, url: &Url) -> Result<Fetched> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.behaviour {
                Behaviour::Content => Ok(Fetched::content(chunked(CONTENT))),
                Behaviour::TokenThenContent if n == 0 => {
                    Ok(Fetched::interstitial(Confirmation::token("abc")))
                }
                Behaviour::TokenThenContent => Ok(Fetched::content(chunked(CONTENT))),
                Behaviour::BrokenStream => {
                    let parts: Vec<std::io::Result<Vec<u8>>> = vec![
                        Ok(b"CUI,DEN".to_vec()),
                        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
                    ];
                    Ok(Fetched::content(stream::iter(parts).boxed()))
                }
                Behaviour::Hang => Ok(Fetched::content(stream::pending().boxed())),
            }
        }
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .filter(|n| n.ends_with(".part"))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn second_ensure_is_a_no_op() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("nested/cache/large.csv");
        let transfer = Arc::new(FakeTransfer::new(Behaviour::Content));
        let cache = BlobCache::new(Arc::new(StaticResolver), transfer.clone());

        cache.ensure("big", &dest).await?;
        cache.ensure("big", &dest).await?;

        assert_eq!(transfer.calls(), 1);
        assert_eq!(std::fs::read(&dest)?, CONTENT);
        assert!(leftovers(dest.parent().unwrap()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn existing_file_is_trusted_without_download() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("large.csv");
        std::fs::write(&dest, b"CUI\n1\n")?;
        let transfer = Arc::new(FakeTransfer::new(Behaviour::Content));
        let cache = BlobCache::new(Arc::new(FailingResolver), transfer.clone());

        cache.ensure("big", &dest).await?;
        assert_eq!(transfer.calls(), 0);
        assert_eq!(std::fs::read(&dest)?, b"CUI\n1\n");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_download() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("large.csv");
        let mut fake = FakeTransfer::new(Behaviour::Content);
        fake.delay = Duration::from_millis(100);
        let transfer = Arc::new(fake);
        let cache = BlobCache::new(Arc::new(StaticResolver), transfer.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let dest = dest.clone();
            handles.push(tokio::spawn(async move { cache.ensure("big", &dest).await }));
        }
        let mut completed = 0;
        for h in handles {
            h.await.expect("task panicked")?;
            completed += 1;
        }

        assert_eq!(completed, 8);
        assert_eq!(transfer.calls(), 1);
        assert_eq!(std::fs::read(&dest)?, CONTENT);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_dataset_at_two_destinations_fills_both() -> Result<()> {
        let dir = TempDir::new()?;
        let a = dir.path().join("a/large.csv");
        let b = dir.path().join("b/large.csv");
        let mut fake = FakeTransfer::new(Behaviour::Content);
        fake.delay = Duration::from_millis(50);
        let transfer = Arc::new(fake);
        let cache = BlobCache::new(Arc::new(StaticResolver), transfer.clone());

        let (ra, rb) = tokio::join!(cache.ensure("big", &a), cache.ensure("big", &b));
        ra?;
        rb?;

        assert_eq!(std::fs::read(&a)?, CONTENT);
        assert_eq!(std::fs::read(&b)?, CONTENT);
        assert_eq!(transfer.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn confirmation_token_is_replayed() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("large.csv");
        let transfer = Arc::new(FakeTransfer::new(Behaviour::TokenThenContent));
        let cache = BlobCache::new(Arc::new(StaticResolver), transfer.clone());

        cache.ensure("big", &dest).await?;

        assert_eq!(transfer.calls(), 2);
        let urls = transfer.urls.lock().unwrap();
        assert_eq!(urls[0].as_str(), "https://blobs.test/uc?id=big");
        assert_eq!(urls[1].as_str(), "https://blobs.test/uc?id=big&confirm=abc");
        assert_eq!(std::fs::read(&dest)?, CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn broken_stream_leaves_no_complete_looking_file() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("large.csv");
        let transfer = Arc::new(FakeTransfer::new(Behaviour::BrokenStream));
        let cache = BlobCache::new(Arc::new(StaticResolver), transfer.clone());

        let err = cache.ensure("big", &dest).await.unwrap_err();
        assert!(matches!(err, LookupError::Download(_)), "got {err:?}");
        assert!(!dest.exists());
        assert!(leftovers(dir.path()).is_empty());

        // A later call tries again instead of trusting a truncated file.
        let _ = cache.ensure("big", &dest).await;
        assert_eq!(transfer.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn resolver_failure_is_a_download_error() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("large.csv");
        let transfer = Arc::new(FakeTransfer::new(Behaviour::Content));
        let cache = BlobCache::new(Arc::new(FailingResolver), transfer.clone());

        let err = cache.ensure("big", &dest).await.unwrap_err();
        assert!(matches!(err, LookupError::Download(_)));
        assert_eq!(transfer.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn stalled_download_times_out() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("large.csv");
        let transfer = Arc::new(FakeTransfer::new(Behaviour::Hang));
        let cache = BlobCache::with_timeout(
            Arc::new(StaticResolver),
            transfer,
            Some(Duration::from_millis(50)),
        );

        let err = cache.ensure("big", &dest).await.unwrap_err();
        assert!(matches!(err, LookupError::Timeout { .. }), "got {err:?}");
        assert!(!dest.exists());
        Ok(())
    }
}
