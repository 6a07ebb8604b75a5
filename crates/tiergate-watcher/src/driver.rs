//! List-watch driver shared by every watcher.

use std::fmt::Debug;

use futures::StreamExt;
use kube::Api;
use kube::runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{info, warn};

/// Consumes watch events for one resource kind.
pub trait WatchHandler<K> {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn handle(&mut self, event: watcher::Event<K>);
}

/// Drive `handler` from a list-watch over `api` until shutdown.
///
/// Stream errors are logged and retried with the watcher's default
/// backoff. A reconnect after a gap arrives as a fresh re-list.
pub async fn run<K, H>(api: Api<K>, mut handler: H, mut shutdown: watch::Receiver<bool>)
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    H: WatchHandler<K>,
{
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    let mut stream = std::pin::pin!(stream);
    info!(watcher = handler.name(), "watcher started");

    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(event)) => handler.handle(event),
                Some(Err(e)) => warn!(watcher = handler.name(), error = %e, "watch stream error, retrying"),
                None => {
                    warn!(watcher = handler.name(), "watch stream ended");
                    break;
                }
            },
            _ = shutdown.changed() => {
                info!(watcher = handler.name(), "watcher shutting down");
                break;
            }
        }
    }
}
