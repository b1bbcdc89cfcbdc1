#![allow(unused_crate_dependencies)]
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use sealdex::{Client, MemoryKeywordStore, SearchRequest, Server};

const CHAIN_LENGTH: u64 = 200;

struct Fixture {
    _dir: TempDir,
    server: Server,
    client: Client,
    store: MemoryKeywordStore,
    request: SearchRequest,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let client = Client::setup().unwrap();
    let server = Server::setup(dir.path(), 1024, &client.public_key()).unwrap();
    let store = MemoryKeywordStore::new();

    for i in 0..CHAIN_LENGTH {
        assert!(server.update(&client.update_request(&store, "kitten", i)));
    }
    let request = client.search_request(&store, "kitten");

    Fixture {
        _dir: dir,
        server,
        client,
        store,
        request,
    }
}

pub fn benchmarks(c: &mut Criterion) {
    let f = fixture();

    c.bench_function("derive one update request", |b| {
        b.iter(|| black_box(f.client.update_request(&f.store, "bench", 7)))
    });

    c.bench_function("sequential search", |b| {
        b.iter(|| black_box(f.server.search(&f.request)))
    });

    c.bench_function("pipelined search", |b| {
        b.iter(|| black_box(f.server.search_parallel_full(&f.request)))
    });

    c.bench_function("access-pool search (4 workers)", |b| {
        b.iter(|| black_box(f.server.search_parallel(&f.request, 4)))
    });

    c.bench_function("sharded search (4 shards)", |b| {
        b.iter(|| black_box(f.server.search_parallel_light(&f.request, 4)))
    });
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
