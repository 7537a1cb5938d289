//! Request coalescing for request-scoped data loading.
//!
//! Callers ask a [`KeyedLoader`] (or a keyless [`Loader`]) for values and get a [`LoadFuture`]
//! back immediately. Requests accumulate in the loader's open batch; equal keys share one result.
//! Nothing is fetched until the owning [`LoadContext`] is drained, at which point every runnable
//! loader calls its [`BatchFunction`] once with the distinct keys it collected. Requests issued
//! while a drain is running, from inside a batch function, from futures polled alongside the
//! drain, or from tasks started with [`LoadContext::spawn`], are executed by that same drain.
//!
//! ```
//! use std::collections::HashMap;
//!
//! use tickload::{BoxError, KeyedLoader, LoadContext};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = LoadContext::new();
//! let names: KeyedLoader<u32, String> =
//!     KeyedLoader::new(&context, |ids: Vec<u32>, _cancel: CancellationToken| async move {
//!         let names = ids.into_iter().map(|id| (id, format!("user-{}", id)));
//!         Ok::<_, BoxError>(names.collect::<HashMap<_, _>>())
//!     });
//!
//! let (first, second) = (names.load(1), names.load(2));
//! context.drain(CancellationToken::new()).await;
//!
//! assert_eq!(first.await.unwrap().as_deref(), Some("user-1"));
//! assert_eq!(second.await.unwrap().as_deref(), Some("user-2"));
//! # }
//! ```
mod batch_function;
mod composite;
mod context;
mod error;
mod loader;
#[cfg(feature = "stats")]
mod loader_stats;
mod pending;
mod runnable;
mod slot;
mod tracked;

pub use batch_function::{BatchFunction, FetchFunction};
pub use context::{DrainSummary, LoadContext};
pub use error::{BoxError, LoadError, RegistryError};
pub use loader::{KeyedLoader, Loader};
#[cfg(feature = "stats")]
pub use loader_stats::LoaderStats;
pub use slot::LoadFuture;
