//! Logging setup and per-bus logger scoping.
//!
//! The bus logs through `tracing`. A host can hand the bus its own
//! [`Dispatch`] in the settings; the bus then runs its work with that
//! dispatcher as the scoped default instead of the global one.

use std::future::Future;

use futures_util::future::Either;
use tracing::Dispatch;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a global fmt subscriber. `RUST_LOG` wins over `level`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing(level: &str) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Run `f` with `logger` as the default dispatcher, if any.
pub fn scoped<T>(logger: Option<&Dispatch>, f: impl FnOnce() -> T) -> T {
    match logger {
        Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
        None => f(),
    }
}

/// Poll `fut` with `logger` as the default dispatcher, if any.
pub fn instrument<F: Future>(logger: Option<&Dispatch>, fut: F) -> Either<WithDispatch<F>, F> {
    match logger {
        Some(dispatch) => Either::Left(fut.with_subscriber(dispatch.clone())),
        None => Either::Right(fut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::Subscriber;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::Context;

    struct CountingLayer(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for CountingLayer {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_dispatch() -> (Dispatch, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CountingLayer(count.clone()));
        (Dispatch::new(subscriber), count)
    }

    #[test]
    fn test_scoped_routes_events() {
        let (dispatch, count) = counting_dispatch();
        let value = scoped(Some(&dispatch), || {
            tracing::info!("inside");
            7
        });
        assert_eq!(value, 7);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scoped_without_logger_runs() {
        assert_eq!(scoped(None, || 3), 3);
    }

    #[tokio::test]
    async fn test_instrument_routes_future_events() {
        let (dispatch, count) = counting_dispatch();
        let value = instrument(Some(&dispatch), async {
            tracing::warn!("one");
            tokio::task::yield_now().await;
            tracing::warn!("two");
            5
        })
        .await;
        assert_eq!(value, 5);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
