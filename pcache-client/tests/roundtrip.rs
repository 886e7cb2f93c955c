//! Property tests: arbitrary structured values survive a set/get cycle.

use std::collections::BTreeMap;
use std::time::Duration;

use pcache_client::{CacheClient, ClientConfig, Expiration};
use pcache_mockstore::MockStore;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    id: u64,
    label: String,
    enabled: bool,
    scores: Vec<i32>,
    attributes: BTreeMap<String, String>,
    parent: Option<u64>,
}

fn record_strategy() -> impl Strategy<Value = Record> {
    (
        any::<u64>(),
        ".{0,32}",
        any::<bool>(),
        prop::collection::vec(any::<i32>(), 0..8),
        prop::collection::btree_map("[a-z]{1,8}", ".{0,16}", 0..4),
        any::<Option<u64>>(),
    )
        .prop_map(|(id, label, enabled, scores, attributes, parent)| Record {
            id,
            label,
            enabled,
            scores,
            attributes,
            parent,
        })
}

fn client_for(server: &MockStore) -> CacheClient {
    let config = ClientConfig {
        addr: server.addr_string(),
        read_timeout: Some(Duration::from_secs(2)),
        ..ClientConfig::default()
    };
    CacheClient::with_config(config).expect("client")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn set_then_get_returns_equal_value(
        key in "[a-z0-9:_-]{1,24}",
        record in record_strategy(),
    ) {
        let server = MockStore::start().expect("mock store");
        let client = client_for(&server);

        client.set(&key, &record, Expiration::Never).expect("set");
        let loaded: Record = client.get(&key).expect("get");
        prop_assert_eq!(loaded, record);
    }

    #[test]
    fn get_multi_matches_individual_gets(
        records in prop::collection::vec(record_strategy(), 1..6),
    ) {
        let server = MockStore::start().expect("mock store");
        let client = client_for(&server);

        let keys: Vec<String> = (0..records.len()).map(|idx| format!("rec:{}", idx)).collect();
        for (key, record) in keys.iter().zip(&records) {
            client.set(key, record, Expiration::Default).expect("set");
        }

        let items = client.get_multi(&keys).expect("get_multi");
        for (key, record) in keys.iter().zip(&records) {
            let loaded: Record = pcache_client::Getter::get(&items, key).expect("item");
            prop_assert_eq!(&loaded, record);
        }
    }
}
