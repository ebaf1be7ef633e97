//! Item ordering and grouping ahead of batching.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Optional attributes the batch loop can order and group by.
///
/// Every method defaults to "not available". Orderings that need an attribute
/// some item lacks fall back to input order, and items without a group key
/// share one group.
pub trait BatchItem {
    /// Creation or capture time, in seconds since the Unix epoch
    fn timestamp(&self) -> Option<i64> {
        None
    }

    /// Size in bytes
    fn byte_size(&self) -> Option<u64> {
        None
    }

    /// Type discriminator used when grouping by type
    fn group_key(&self) -> Option<String> {
        None
    }
}

impl<T: BatchItem + ?Sized> BatchItem for &T {
    fn timestamp(&self) -> Option<i64> {
        (**self).timestamp()
    }

    fn byte_size(&self) -> Option<u64> {
        (**self).byte_size()
    }

    fn group_key(&self) -> Option<String> {
        (**self).group_key()
    }
}

impl BatchItem for String {}
impl BatchItem for u32 {}
impl BatchItem for u64 {}
impl BatchItem for usize {}

/// Order in which items are fed into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStrategy {
    /// Input order
    #[default]
    None,
    TimestampAscending,
    TimestampDescending,
    SizeAscending,
    SizeDescending,
    Random,
}

impl fmt::Display for OrderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::TimestampAscending => "timestamp-asc",
            Self::TimestampDescending => "timestamp-desc",
            Self::SizeAscending => "size-asc",
            Self::SizeDescending => "size-desc",
            Self::Random => "random",
        };
        f.write_str(name)
    }
}

impl FromStr for OrderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "input" => Ok(Self::None),
            "timestamp-asc" | "oldest" => Ok(Self::TimestampAscending),
            "timestamp-desc" | "newest" => Ok(Self::TimestampDescending),
            "size-asc" | "smallest" => Ok(Self::SizeAscending),
            "size-desc" | "largest" => Ok(Self::SizeDescending),
            "random" | "shuffle" => Ok(Self::Random),
            other => Err(format!("unknown order strategy: {}", other)),
        }
    }
}

/// Reorders `items` per `strategy`. Never fails; unsupported orderings keep input order.
pub fn apply_order<T: BatchItem>(mut items: Vec<T>, strategy: OrderStrategy, seed: Option<u64>) -> Vec<T> {
    match strategy {
        OrderStrategy::None => {}
        OrderStrategy::TimestampAscending | OrderStrategy::TimestampDescending => {
            let Some(keys) = items.iter().map(BatchItem::timestamp).collect::<Option<Vec<_>>>() else {
                debug!("Not every item has a timestamp, keeping input order");
                return items;
            };
            items = sort_by_keys(items, keys);
            if strategy == OrderStrategy::TimestampDescending {
                items.reverse();
            }
        }
        OrderStrategy::SizeAscending | OrderStrategy::SizeDescending => {
            let Some(keys) = items.iter().map(BatchItem::byte_size).collect::<Option<Vec<_>>>() else {
                debug!("Not every item has a size, keeping input order");
                return items;
            };
            items = sort_by_keys(items, keys);
            if strategy == OrderStrategy::SizeDescending {
                items.reverse();
            }
        }
        OrderStrategy::Random => match seed {
            Some(seed) => items.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => items.shuffle(&mut rand::thread_rng()),
        },
    }
    items
}

/// Stable sort of `items` by precomputed `keys`.
fn sort_by_keys<T, K: Ord + Copy>(items: Vec<T>, keys: Vec<K>) -> Vec<T> {
    let mut keyed: Vec<(K, T)> = keys.into_iter().zip(items).collect();
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, item)| item).collect()
}

/// Splits `items` by [`BatchItem::group_key`], keeping first-seen group order and
/// the relative order of items inside each group.
pub fn group_by_key<T: BatchItem>(items: Vec<T>) -> Vec<(Option<String>, Vec<T>)> {
    let mut index: HashMap<Option<String>, usize> = HashMap::new();
    let mut groups: Vec<(Option<String>, Vec<T>)> = Vec::new();

    for item in items {
        let key = item.group_key();
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, Vec::new()));
                groups.len() - 1
            }
        };
        groups[slot].1.push(item);
    }

    groups
}
