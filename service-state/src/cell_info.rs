//! Last known cell info list, shared with callers outside the event loop.
//!
//! Foreign callers either read a fresh cached list or park a oneshot that the
//! event loop fulfills once the modem answers. Only the first waiter triggers a
//! modem request, later ones piggyback on it.

use crate::state::cell::CellInfo;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{sync::oneshot, time::Instant};

type Waiter = oneshot::Sender<Option<Vec<CellInfo>>>;

#[derive(Debug, Default)]
struct Inner {
    list: Option<Vec<CellInfo>>,
    updated: Option<Instant>,
    waiters: Vec<Waiter>,
}

#[derive(Debug, Clone, Default)]
pub struct CellInfoCache {
    inner: Arc<Mutex<Inner>>,
}

impl CellInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached list if it was refreshed within `max_age`.
    pub fn fresh(&self, max_age: Duration) -> Option<Option<Vec<CellInfo>>> {
        let inner = self.lock();
        let updated = inner.updated?;
        (updated.elapsed() < max_age).then(|| inner.list.clone())
    }

    pub fn last(&self) -> Option<Vec<CellInfo>> {
        self.lock().list.clone()
    }

    /// Parks a waiter. Returns true if no request was in flight yet, meaning
    /// the caller has to ask the modem.
    pub fn wait(&self) -> (oneshot::Receiver<Option<Vec<CellInfo>>>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        inner.waiters.retain(|w| !w.is_closed());
        let first = inner.waiters.is_empty();
        inner.waiters.push(tx);

        (rx, first)
    }

    /// Answer to a solicited request. `None` on modem error, which keeps the
    /// previous list cached.
    pub fn complete(&self, list: Option<Vec<CellInfo>>) {
        let mut inner = self.lock();
        if let Some(list) = &list {
            inner.list = Some(list.clone());
            inner.updated = Some(Instant::now());
        }
        let answer = list.or_else(|| inner.list.clone());
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.send(answer.clone());
        }
    }

    /// Unsolicited refresh.
    pub fn update(&self, list: Vec<CellInfo>) {
        let mut inner = self.lock();
        inner.list = Some(list);
        inner.updated = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::cell::CellIdentity;

    fn cells() -> Vec<CellInfo> {
        vec![CellInfo {
            registered: true,
            identity: CellIdentity::Gsm {
                mcc: Some("262".to_string()),
                mnc: Some("01".to_string()),
                lac: 1,
                cid: 2,
            },
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn it_expires_cached_list() {
        // Arrange
        let cache = CellInfoCache::new();
        cache.update(cells());

        // Act
        let fresh = cache.fresh(Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(3)).await;
        let stale = cache.fresh(Duration::from_secs(2));

        // Assert
        assert_eq!(fresh, Some(Some(cells())));
        assert_eq!(stale, None);
    }

    #[tokio::test]
    async fn it_answers_every_waiter_once() {
        let cache = CellInfoCache::new();
        let (rx_a, first_a) = cache.wait();
        let (rx_b, first_b) = cache.wait();

        cache.complete(Some(cells()));

        assert!(first_a);
        assert!(!first_b);
        assert_eq!(rx_a.await.unwrap(), Some(cells()));
        assert_eq!(rx_b.await.unwrap(), Some(cells()));
        assert_eq!(cache.last(), Some(cells()));
    }

    #[tokio::test]
    async fn it_answers_with_previous_list_on_error() {
        let cache = CellInfoCache::new();
        cache.update(cells());
        let (rx, _) = cache.wait();

        cache.complete(None);

        assert_eq!(rx.await.unwrap(), Some(cells()));
    }
}
