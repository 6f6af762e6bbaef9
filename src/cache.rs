//! Preload cache of prepared video players.
//!
//! A fixed pool of worker players prepares clips ahead of need. Prepared
//! players are kept in an LRU keyed by clip; the scheduler can take one over
//! instead of preparing from scratch and hands its old player back as a
//! worker, so the number of decode players never changes.

use crate::video::VideoPlayer;
use lru::LruCache;
use std::collections::VecDeque;
use std::time::Duration;

/// Default number of preparation workers.
pub const DEFAULT_POOL_SIZE: usize = 3;

pub struct PreloadCache<P> {
    /// Workers with nothing assigned.
    idle: Vec<P>,
    /// Workers whose clip is still preparing.
    preparing: Vec<P>,
    /// Requests waiting for a worker, oldest first.
    queue: VecDeque<String>,
    /// Prepared workers by clip, least recently requested first out.
    ready: LruCache<String, P>,
    pool_size: usize,
}

impl<P: VideoPlayer> PreloadCache<P> {
    /// Create a cache that owns `workers` as its pool.
    pub fn new(workers: Vec<P>) -> Self {
        let pool_size = workers.len();
        tracing::info!("Preload cache initialized with {} workers", pool_size);
        Self {
            idle: workers,
            preparing: Vec::new(),
            queue: VecDeque::new(),
            ready: LruCache::unbounded(),
            pool_size,
        }
    }

    /// Return the prepared player for `clip`, or start preparing it.
    ///
    /// Requests beyond the pool's capacity wait in FIFO order.
    pub fn request(&mut self, clip: &str) -> Option<&P> {
        if self.ready.contains(clip) {
            // Promote to most recently used.
            return self.ready.get(clip);
        }
        if self.pool_size == 0 || self.is_pending(clip) {
            return None;
        }

        tracing::debug!("Queueing preload of {}", clip);
        self.queue.push_back(clip.to_string());
        self.dispatch();
        None
    }

    /// Whether `clip` is prepared, without touching LRU order.
    pub fn peek(&self, clip: &str) -> bool {
        self.ready.contains(clip)
    }

    /// Whether `clip` is queued or preparing.
    pub fn is_pending(&self, clip: &str) -> bool {
        self.queue.iter().any(|c| c == clip)
            || self.preparing.iter().any(|w| w.clip() == Some(clip))
    }

    /// Remove and return the prepared player for `clip`.
    pub fn take(&mut self, clip: &str) -> Option<P> {
        let player = self.ready.pop(clip)?;
        tracing::debug!("Handing out preloaded {}", clip);
        Some(player)
    }

    /// Accept a player back into the worker pool.
    pub fn give_back(&mut self, mut player: P) {
        if let Err(e) = player.stop() {
            tracing::warn!("Failed to stop returned player: {:#}", e);
        }
        self.idle.push(player);
        self.dispatch();
    }

    /// Advance in-flight preparations and start queued ones.
    ///
    /// Workers whose preparation failed return to the idle pool.
    pub fn update(&mut self, dt: Duration) {
        let mut failed = Vec::new();
        for (i, worker) in self.preparing.iter_mut().enumerate() {
            worker.update(dt);
            if let Some(e) = worker.take_error() {
                tracing::warn!("Preload of {} failed: {:#}", worker.clip().unwrap_or("?"), e);
                failed.push(i);
            }
        }
        for i in failed.into_iter().rev() {
            let mut worker = self.preparing.swap_remove(i);
            if let Err(e) = worker.stop() {
                tracing::warn!("Failed to stop failed preload: {:#}", e);
            }
            self.idle.push(worker);
        }

        let (done, pending): (Vec<P>, Vec<P>) = std::mem::take(&mut self.preparing)
            .into_iter()
            .partition(|w| w.is_prepared());
        self.preparing = pending;

        for worker in done {
            let Some(clip) = worker.clip().map(str::to_string) else {
                self.idle.push(worker);
                continue;
            };
            tracing::debug!("Preloaded {}", clip);
            if let Some(stale) = self.ready.put(clip, worker) {
                self.give_back(stale);
            }
        }

        self.dispatch();
    }

    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(mut worker) = self.free_worker() else {
                break;
            };
            let Some(clip) = self.queue.pop_front() else {
                self.idle.push(worker);
                break;
            };

            match worker.load(&clip, false).and_then(|_| worker.prepare()) {
                Ok(()) => self.preparing.push(worker),
                Err(e) => {
                    tracing::warn!("Failed to preload {}: {:#}", clip, e);
                    self.idle.push(worker);
                }
            }
        }
    }

    /// An idle worker, or one reclaimed from the least recently used ready entry.
    fn free_worker(&mut self) -> Option<P> {
        if let Some(worker) = self.idle.pop() {
            return Some(worker);
        }

        let (clip, mut worker) = self.ready.pop_lru()?;
        tracing::debug!("Evicting superseded preload {}", clip);
        if let Err(e) = worker.stop() {
            tracing::warn!("Failed to stop evicted player: {:#}", e);
        }
        Some(worker)
    }

    /// Stop everything and return all workers to the idle pool.
    pub fn clear(&mut self) {
        self.queue.clear();
        let mut workers: Vec<P> = self.preparing.drain(..).collect();
        while let Some((_, worker)) = self.ready.pop_lru() {
            workers.push(worker);
        }
        for mut worker in workers {
            let _ = worker.stop();
            self.idle.push(worker);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            pool_size: self.pool_size,
            idle: self.idle.len(),
            preparing: self.preparing.len(),
            queued: self.queue.len(),
            ready: self.ready.len(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub pool_size: usize,
    pub idle: usize,
    pub preparing: usize,
    pub queued: usize,
    pub ready: usize,
}
