use std::collections::HashMap;

use async_trait::async_trait;
use tickload::{BatchFunction, BoxError, KeyedLoader, LoadContext};
use tokio_util::sync::CancellationToken;

// Trivially loads values from a HashMap. A real batch function would issue one query for all the
// keys it is given.
struct Films {
    titles: HashMap<i64, String>,
}

#[async_trait]
impl BatchFunction<i64, String> for Films {
    async fn load(
        &self,
        keys: &[i64],
        _cancel: &CancellationToken,
    ) -> Result<HashMap<i64, String>, BoxError> {
        println!("fetching {:?}", keys);
        Ok(keys.iter().filter_map(|k| self.titles.get(k).cloned().map(|v| (*k, v))).collect())
    }
}

#[tokio::main]
async fn main() {
    let mut titles = HashMap::new();
    titles.insert(2001, "a space odyssey".to_owned());
    titles.insert(7, "samurai".to_owned());
    titles.insert(12, "angry men".to_owned());

    let context = LoadContext::new();
    let films = KeyedLoader::new(&context, Films { titles });

    let samurai = films.load(7);
    let missing = films.load(15);
    let many = films.load_many(vec![12, 2010, 2001, 7]);

    // One fetch for keys {7, 12, 15, 2001, 2010}.
    context.drain(CancellationToken::new()).await;

    assert_eq!(samurai.await.unwrap().as_deref(), Some("samurai"));
    assert_eq!(missing.await.unwrap(), None);
    assert_eq!(
        many.await.unwrap().iter().map(Option::as_deref).collect::<Vec<_>>(),
        vec![Some("angry men"), None, Some("a space odyssey"), Some("samurai")]
    );
}
