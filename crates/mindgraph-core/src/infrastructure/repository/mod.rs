//! Store-backed repositories
//!
//! Readers query the store directly. Writers append [`Operation`]s to a
//! buffer owned by the unit of work; nothing reaches the store until the
//! unit of work commits. The `*Repository` handles combine both and are
//! what [`UnitOfWork`](crate::application::UnitOfWork) hands out.

mod category;
mod edge;
mod node;

pub use category::{CategoryRepository, StoreCategoryReader};
pub use edge::{EdgeRepository, StoreEdgeReader};
pub use node::{NodeRepository, StoreNodeReader};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::page::{Page, PageRequest};
use crate::error::Result;
use crate::storage::cursor;
use crate::storage::store::{Query, QueryPage, Record, Store};

fn to_data<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn decode_all<T: DeserializeOwned>(records: &[Record]) -> Result<Vec<T>> {
    records.iter().map(Record::decode).collect()
}

/// Run `query` as one page of `page`
async fn query_page<T: DeserializeOwned>(
    store: &dyn Store,
    query: Query,
    page: &PageRequest,
) -> Result<Page<T>> {
    let start_after = cursor::decode_opt(page.cursor.as_deref())?;
    let result: QueryPage = store
        .query(&query.limit(page.limit.max(1)).start_after(start_after))
        .await?;

    let items = decode_all(&result.records)?;
    Ok(Page::new(
        items,
        result.last_sort_key.as_deref().map(cursor::encode),
    ))
}

/// Run `query` to exhaustion
async fn query_all<T: DeserializeOwned>(store: &dyn Store, query: Query) -> Result<Vec<T>> {
    let result = store.query(&query).await?;
    decode_all(&result.records)
}
