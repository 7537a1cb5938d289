use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use parking_lot::Mutex;
use tickload::{BatchFunction, BoxError, KeyedLoader, LoadContext, LoadError, Loader};
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, Eq, Clone)]
struct DummyData(String);

/// Serves values from a fixed map and records the key set of every call.
struct DummyDataLoader {
    map: HashMap<i64, String>,
    calls: Arc<Mutex<Vec<BTreeSet<i64>>>>,
}

impl DummyDataLoader {
    fn new(entries: &[(i64, &str)]) -> (Self, Arc<Mutex<Vec<BTreeSet<i64>>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let map = entries.iter().map(|(k, v)| (*k, v.to_string())).collect();
        (Self { map, calls: calls.clone() }, calls)
    }
}

#[async_trait]
impl BatchFunction<i64, DummyData> for DummyDataLoader {
    async fn load(
        &self,
        keys: &[i64],
        _cancel: &CancellationToken,
    ) -> Result<HashMap<i64, DummyData>, BoxError> {
        self.calls.lock().push(keys.iter().copied().collect());
        Ok(keys
            .iter()
            .filter_map(|k| self.map.get(k).cloned().map(|v| (*k, DummyData(v))))
            .collect())
    }
}

fn data(s: &str) -> Option<DummyData> {
    Some(DummyData(s.to_owned()))
}

#[tokio::test]
async fn basic_load() {
    let context = LoadContext::new();
    let (batch_fn, calls) = DummyDataLoader::new(&[(42, "Foo")]);
    let loader = KeyedLoader::new(&context, batch_fn);

    let value = loader.load(42);
    context.drain(CancellationToken::new()).await;

    assert_eq!(value.await.unwrap(), data("Foo"));
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test]
async fn distinct_keys_share_one_fetch() {
    let context = LoadContext::new();
    let (batch_fn, calls) = DummyDataLoader::new(&[(1, "one"), (2, "two")]);
    let loader = KeyedLoader::new(&context, batch_fn);

    let one = loader.load(1);
    let two = loader.load(2);
    let one_again = loader.load(1);
    assert_eq!(context.runnable_len(), 1);

    let summary = context.drain(CancellationToken::new()).await;
    assert_eq!(summary.batches, 1);
    assert_eq!(*calls.lock(), vec![BTreeSet::from([1, 2])]);

    assert_eq!(one.await.unwrap(), data("one"));
    assert_eq!(two.await.unwrap(), data("two"));
    assert_eq!(one_again.await.unwrap(), data("one"));
}

#[tokio::test]
async fn repeated_key_is_fetched_once() {
    let context = LoadContext::new();
    let (batch_fn, calls) = DummyDataLoader::new(&[(7, "seven")]);
    let loader = KeyedLoader::new(&context, batch_fn);

    let requests = (0..20).map(|_| loader.load(7)).collect::<Vec<_>>();
    assert_eq!(loader.pending_len(), 1);
    context.drain(CancellationToken::new()).await;

    assert_eq!(*calls.lock(), vec![BTreeSet::from([7])]);
    for value in future::join_all(requests).await {
        assert_eq!(value.unwrap(), data("seven"));
    }
}

#[tokio::test]
async fn batches_do_not_span_drains() {
    let context = LoadContext::new();
    let (batch_fn, calls) = DummyDataLoader::new(&[(42, "Foo")]);
    let loader = KeyedLoader::new(&context, batch_fn);

    let first = loader.load(42);
    context.drain(CancellationToken::new()).await;
    let second = loader.load(42);
    context.drain(CancellationToken::new()).await;

    assert_eq!(first.await.unwrap(), data("Foo"));
    assert_eq!(second.await.unwrap(), data("Foo"));
    assert_eq!(calls.lock().len(), 2);
}

#[tokio::test]
async fn missing_key_resolves_to_none() {
    let context = LoadContext::new();
    let (batch_fn, _calls) = DummyDataLoader::new(&[(5, "red fish")]);
    let loader = KeyedLoader::new(&context, batch_fn);

    let present = loader.load(5);
    let missing = loader.load(99);
    context.drain(CancellationToken::new()).await;

    assert_eq!(present.await.unwrap(), data("red fish"));
    assert_eq!(missing.await.unwrap(), None);
}

#[tokio::test]
async fn basic_load_many() {
    let context = LoadContext::new();
    let (batch_fn, calls) = DummyDataLoader::new(&[
        (42, "one fish"),
        (12, "two fish"),
        (5, "red fish"),
        (8, "blue fish"),
    ]);
    let loader = KeyedLoader::new(&context, batch_fn);

    let (values, _) = future::join(
        loader.load_many(vec![5, 12, 8, 12, 77]),
        context.drain(CancellationToken::new()),
    )
    .await;

    assert_eq!(
        values.unwrap(),
        vec![data("red fish"), data("two fish"), data("blue fish"), data("two fish"), None]
    );
    assert_eq!(*calls.lock(), vec![BTreeSet::from([5, 8, 12, 77])]);
}

#[tokio::test]
async fn load_async() {
    let context = LoadContext::new();
    let (batch_fn, calls) = DummyDataLoader::new(&[
        (42, "one fish"),
        (12, "two fish"),
        (5, "red fish"),
        (8, "blue fish"),
    ]);
    let loader = KeyedLoader::new(&context, batch_fn);

    let tuple = future::join4(
        loader.load(5),
        loader.load_many(vec![5, 42]),
        loader.load(99),
        loader.load(12),
    );
    let (tuple, _) = future::join(tuple, context.drain(CancellationToken::new())).await;

    assert_eq!(tuple.0.unwrap(), data("red fish"));
    assert_eq!(tuple.1.unwrap(), vec![data("red fish"), data("one fish")]);
    assert_eq!(tuple.2.unwrap(), None);
    assert_eq!(tuple.3.unwrap(), data("two fish"));
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test]
async fn keyless_requests_share_one_fetch() {
    let context = LoadContext::new();
    let calls = Arc::new(Mutex::new(0));
    let loader: Loader<Arc<Vec<String>>> = Loader::new(&context, {
        let calls = calls.clone();
        move |_cancel: CancellationToken| {
            let calls = calls.clone();
            async move {
                *calls.lock() += 1;
                Ok::<_, BoxError>(Arc::new(vec!["Title 1".to_owned(), "Title 2".to_owned()]))
            }
        }
    });

    let requests = (0..3).map(|_| loader.load()).collect::<Vec<_>>();
    assert!(loader.is_pending());
    context.drain(CancellationToken::new()).await;
    assert!(!loader.is_pending());

    let values = future::try_join_all(requests).await.unwrap();
    assert_eq!(*calls.lock(), 1);
    assert!(values.iter().all(|books| Arc::ptr_eq(books, &values[0])));
    assert_eq!(values[0].len(), 2);
}

#[tokio::test]
async fn fetch_failure_reaches_every_caller() {
    let context = LoadContext::new();
    let loader: KeyedLoader<u8, u8> =
        KeyedLoader::new(&context, |_keys: Vec<u8>, _cancel: CancellationToken| async {
            Err::<HashMap<u8, u8>, _>("database unavailable")
        });

    let a = loader.load(1);
    let b = loader.load(2);
    let b_again = loader.load(2);
    context.drain(CancellationToken::new()).await;

    for result in [a.await, b.await, b_again.await] {
        match result {
            Err(LoadError::Fetch(err)) => assert_eq!(err.to_string(), "database unavailable"),
            other => panic!("expected fetch failure, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn keyless_fetch_failure_reaches_every_caller() {
    let context = LoadContext::new();
    let loader: Loader<u32> = Loader::new(&context, |_cancel: CancellationToken| async {
        Err::<u32, _>("quota exceeded")
    });

    let requests = (0..3).map(|_| loader.load()).collect::<Vec<_>>();
    let summary = context.drain(CancellationToken::new()).await;
    assert_eq!(summary.batches, 1);

    for result in future::join_all(requests).await {
        match result {
            Err(LoadError::Fetch(err)) => assert_eq!(err.to_string(), "quota exceeded"),
            other => panic!("expected fetch failure, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn keyless_fetch_is_cancelled_in_flight() {
    let context = LoadContext::new();
    let calls = Arc::new(Mutex::new(0));
    let loader: Loader<u32> = Loader::new(&context, {
        let calls = calls.clone();
        move |_cancel: CancellationToken| {
            *calls.lock() += 1;
            future::pending::<Result<u32, BoxError>>()
        }
    });

    let first = loader.load();
    let second = loader.load();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    future::join(context.drain(cancel), async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    })
    .await;

    assert_eq!(*calls.lock(), 1);
    assert!(matches!(first.await, Err(LoadError::Cancelled)));
    assert!(matches!(second.await, Err(LoadError::Cancelled)));
}

#[tokio::test]
async fn keyless_fetch_is_skipped_when_already_cancelled() {
    let context = LoadContext::new();
    let calls = Arc::new(Mutex::new(0));
    let loader: Loader<u32> = Loader::new(&context, {
        let calls = calls.clone();
        move |_cancel: CancellationToken| {
            *calls.lock() += 1;
            future::ready(Ok::<u32, BoxError>(1))
        }
    });

    let value = loader.load();
    let cancel = CancellationToken::new();
    cancel.cancel();
    context.drain(cancel).await;

    assert!(matches!(value.await, Err(LoadError::Cancelled)));
    assert_eq!(*calls.lock(), 0);
}

#[tokio::test]
async fn failing_loader_does_not_abort_others() {
    let context = LoadContext::new();
    let failing: KeyedLoader<u8, u8> =
        KeyedLoader::new(&context, |_keys: Vec<u8>, _cancel: CancellationToken| async {
            Err::<HashMap<u8, u8>, _>("boom")
        });
    let (batch_fn, _calls) = DummyDataLoader::new(&[(1, "fine")]);
    let healthy = KeyedLoader::new(&context, batch_fn);

    let bad = failing.load(1);
    let good = healthy.load(1);
    let summary = context.drain(CancellationToken::new()).await;

    assert_eq!(summary.batches, 2);
    assert!(matches!(bad.await, Err(LoadError::Fetch(_))));
    assert_eq!(good.await.unwrap(), data("fine"));
}

#[tokio::test]
async fn composite_keys_are_tuples() {
    let context = LoadContext::new();
    let loader: KeyedLoader<(u32, &'static str), String> = KeyedLoader::new(
        &context,
        |keys: Vec<(u32, &'static str)>, _cancel: CancellationToken| async move {
            let labels = keys.into_iter().map(|key| (key, format!("{}:{}", key.1, key.0)));
            Ok::<_, BoxError>(labels.collect::<HashMap<_, _>>())
        },
    );

    let by_parts = loader.load_composite(3, "en");
    let by_tuple = loader.load((3, "en"));
    let other = loader.load_composite(3, "fr");
    assert_eq!(loader.pending_len(), 2);
    context.drain(CancellationToken::new()).await;

    assert_eq!(by_parts.await.unwrap().as_deref(), Some("en:3"));
    assert_eq!(by_tuple.await.unwrap().as_deref(), Some("en:3"));
    assert_eq!(other.await.unwrap().as_deref(), Some("fr:3"));
}

#[tokio::test]
async fn seven_part_composite_key() {
    let context = LoadContext::new();
    let loader: KeyedLoader<(u8, u8, u8, u8, u8, u8, u8), u8> = KeyedLoader::new(
        &context,
        |keys: Vec<(u8, u8, u8, u8, u8, u8, u8)>, _cancel: CancellationToken| async move {
            Ok::<_, BoxError>(
                keys.into_iter()
                    .map(|k| (k, k.0 + k.1 + k.2 + k.3 + k.4 + k.5 + k.6))
                    .collect::<HashMap<_, _>>(),
            )
        },
    );

    let sum = loader.load_composite(1, 2, 3, 4, 5, 6, 7);
    context.drain(CancellationToken::new()).await;
    assert_eq!(sum.await.unwrap(), Some(28));
}

#[cfg(feature = "stats")]
#[tokio::test]
async fn stats_count_requests_and_batches() {
    let context = LoadContext::new();
    let (batch_fn, _calls) = DummyDataLoader::new(&[(1, "one")]);
    let loader = KeyedLoader::new(&context, batch_fn);

    let _ = (loader.load(1), loader.load(1), loader.load(2));
    context.drain(CancellationToken::new()).await;

    let stats = loader.stats();
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.deduplicated, 1);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.keys_fetched, 2);
    assert_eq!(stats.missing_keys, 1);
    assert_eq!(stats.failed_batches, 0);
}
