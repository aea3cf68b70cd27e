//! Lookahead hints for the media of upcoming items.
//!
//! [`PrefetchManager`] decides which URLs should be warm; a [`HintSink`]
//! does something with that. Hints carry no correctness obligation, so a
//! sink that ignores them is valid.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::RANGE;

use crate::model::FeedItem;

pub trait HintSink {
    fn issue(&mut self, url: &str);
    fn retract(&mut self, url: &str);
}

impl<T: HintSink + ?Sized> HintSink for Box<T> {
    fn issue(&mut self, url: &str) {
        (**self).issue(url);
    }

    fn retract(&mut self, url: &str) {
        (**self).retract(url);
    }
}

pub struct PrefetchManager<S: HintSink> {
    sink: S,
    depth: usize,
    outstanding: Vec<String>,
}

impl<S: HintSink> PrefetchManager<S> {
    pub fn new(sink: S, depth: usize) -> Self {
        Self {
            sink,
            depth,
            outstanding: Vec::new(),
        }
    }

    pub fn outstanding(&self) -> &[String] {
        &self.outstanding
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Retargets hints to the `depth` items after `current`. Stale hints are
    /// retracted before new ones are issued so the outstanding count never
    /// exceeds `depth`.
    pub fn update(&mut self, items: &[FeedItem], current: usize) {
        let mut desired: Vec<String> = Vec::with_capacity(self.depth);
        for item in items.iter().skip(current + 1).take(self.depth) {
            if !item.media_url.is_empty() && !desired.contains(&item.media_url) {
                desired.push(item.media_url.clone());
            }
        }

        let (keep, stale): (Vec<String>, Vec<String>) = self
            .outstanding
            .drain(..)
            .partition(|url| desired.contains(url));
        for url in &stale {
            tracing::debug!(%url, "retract prefetch hint");
            self.sink.retract(url);
        }
        self.outstanding = keep;

        for url in desired {
            if !self.outstanding.contains(&url) {
                tracing::debug!(%url, "issue prefetch hint");
                self.sink.issue(&url);
                self.outstanding.push(url);
            }
        }
    }

    pub fn clear(&mut self) {
        for url in self.outstanding.drain(..) {
            self.sink.retract(&url);
        }
    }
}

/// Discards every hint.
#[derive(Debug, Default)]
pub struct NoopSink;

impl HintSink for NoopSink {
    fn issue(&mut self, _url: &str) {}
    fn retract(&mut self, _url: &str) {}
}

#[derive(Debug, Clone)]
pub struct HttpPrefetchConfig {
    pub workers: usize,
    pub bytes: u64,
    pub user_agent: String,
    pub http_client: Option<Client>,
}

struct Job {
    url: String,
    cancel: Arc<AtomicBool>,
}

/// Warms the HTTP path for upcoming media by reading the first few hundred
/// kilobytes on a small worker pool. Adaptive manifests are fetched whole,
/// they are small.
pub struct HttpPrefetcher {
    jobs: Sender<Job>,
    stop: Sender<()>,
    pending: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl HttpPrefetcher {
    pub fn new(cfg: HttpPrefetchConfig) -> Result<Self> {
        let workers = if cfg.workers == 0 { 2 } else { cfg.workers };
        let client = match cfg.http_client.clone() {
            Some(client) => client,
            None => Client::builder()
                .timeout(Duration::from_secs(20))
                .user_agent(cfg.user_agent.clone())
                .build()
                .context("prefetch: build http client")?,
        };

        let (job_tx, job_rx) = unbounded::<Job>();
        let (stop_tx, stop_rx) = unbounded::<()>();
        let pending: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>> = Arc::default();

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let stop = stop_rx.clone();
            let client = client.clone();
            let pending = pending.clone();
            let bytes = cfg.bytes;
            handles.push(thread::spawn(move || {
                worker(client, bytes, jobs, stop, pending)
            }));
        }

        Ok(Self {
            jobs: job_tx,
            stop: stop_tx,
            pending,
            handles,
        })
    }

    fn shutdown(&mut self) {
        for cancel in self.pending.lock().values() {
            cancel.store(true, Ordering::SeqCst);
        }
        for _ in &self.handles {
            let _ = self.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl HintSink for HttpPrefetcher {
    fn issue(&mut self, url: &str) {
        let cancel = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self
            .pending
            .lock()
            .insert(url.to_string(), cancel.clone())
        {
            previous.store(true, Ordering::SeqCst);
        }
        let _ = self.jobs.send(Job {
            url: url.to_string(),
            cancel,
        });
    }

    fn retract(&mut self, url: &str) {
        if let Some(cancel) = self.pending.lock().remove(url) {
            cancel.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for HttpPrefetcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker(
    client: Client,
    bytes: u64,
    jobs: Receiver<Job>,
    stop: Receiver<()>,
    pending: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
) {
    loop {
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(jobs) -> msg => {
                let Ok(job) = msg else { break };
                if job.cancel.load(Ordering::SeqCst) {
                    continue;
                }
                match warm(&client, &job, bytes) {
                    Ok(read) => tracing::debug!(url = %job.url, read, "prefetched"),
                    Err(err) => tracing::debug!(url = %job.url, error = %format!("{err:#}"), "prefetch failed"),
                }
                let mut pending = pending.lock();
                if pending
                    .get(&job.url)
                    .is_some_and(|cancel| Arc::ptr_eq(cancel, &job.cancel))
                {
                    pending.remove(&job.url);
                }
            }
        }
    }
}

fn warm(client: &Client, job: &Job, bytes: u64) -> Result<u64> {
    let response = client
        .get(&job.url)
        .header(RANGE, format!("bytes=0-{}", bytes.saturating_sub(1)))
        .send()
        .context("prefetch: request")?;
    if !response.status().is_success() {
        return Err(anyhow!("prefetch: status {}", response.status()));
    }

    let mut reader = response.take(bytes);
    let mut buf = [0u8; 16 * 1024];
    let mut total = 0u64;
    loop {
        if job.cancel.load(Ordering::SeqCst) {
            return Ok(total);
        }
        let n = reader.read(&mut buf).context("prefetch: body")?;
        if n == 0 {
            return Ok(total);
        }
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::items;

    #[derive(Default)]
    struct RecordingSink {
        log: Vec<String>,
    }

    impl HintSink for RecordingSink {
        fn issue(&mut self, url: &str) {
            self.log.push(format!("+{url}"));
        }
        fn retract(&mut self, url: &str) {
            self.log.push(format!("-{url}"));
        }
    }

    fn url(id: &str) -> String {
        format!("https://stream.test/{id}.mp4")
    }

    #[test]
    fn hints_next_two_items() {
        let list = items(&["a", "b", "c", "d"]);
        let mut manager = PrefetchManager::new(RecordingSink::default(), 2);
        manager.update(&list, 0);
        assert_eq!(manager.outstanding(), &[url("b"), url("c")]);
        assert_eq!(manager.sink().log, vec![format!("+{}", url("b")), format!("+{}", url("c"))]);
    }

    #[test]
    fn stepping_retracts_stale_hints_first() {
        let list = items(&["a", "b", "c", "d", "e"]);
        let mut manager = PrefetchManager::new(RecordingSink::default(), 2);
        manager.update(&list, 0);
        manager.update(&list, 1);
        assert_eq!(manager.outstanding(), &[url("c"), url("d")]);
        assert_eq!(
            manager.sink().log[2..],
            [format!("-{}", url("b")), format!("+{}", url("d"))]
        );
    }

    #[test]
    fn outstanding_stays_bounded_under_jumps() {
        let list = items(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        let mut manager = PrefetchManager::new(RecordingSink::default(), 2);
        for current in [0, 5, 1, 7, 3, 6, 2] {
            manager.update(&list, current);
            assert!(manager.outstanding().len() <= 2);
        }
        manager.update(&list, 7);
        assert!(manager.outstanding().is_empty());
    }

    #[test]
    fn clear_retracts_everything() {
        let list = items(&["a", "b", "c"]);
        let mut manager = PrefetchManager::new(RecordingSink::default(), 2);
        manager.update(&list, 0);
        manager.clear();
        assert!(manager.outstanding().is_empty());
        assert_eq!(manager.sink().log.len(), 4);
    }
}
