use common::{FulfillmentRequest, ItemId, OrderId};
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{FulfillmentExecutor, InMemoryInventoryStore};

fn request(order_id: OrderId) -> FulfillmentRequest {
    FulfillmentRequest {
        order_id,
        item_id: ItemId::new("widget"),
        quantity: 1,
        fault_flag: false,
    }
}

fn bench_fulfill_new_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let executor = FulfillmentExecutor::new(InMemoryInventoryStore::with_items([(
        "widget",
        u32::MAX,
    )]));

    c.bench_function("executor/fulfill_new_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                executor.fulfill(&request(OrderId::new())).await.unwrap();
            });
        });
    });
}

fn bench_fulfill_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let executor = FulfillmentExecutor::new(InMemoryInventoryStore::with_items([("widget", 10)]));
    let replayed = request(OrderId::new());

    rt.block_on(async {
        executor.fulfill(&replayed).await.unwrap();
    });

    c.bench_function("executor/fulfill_already_applied", |b| {
        b.iter(|| {
            rt.block_on(async {
                executor.fulfill(&replayed).await.unwrap();
            });
        });
    });
}

fn bench_contended_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("executor/contended_item_50_orders", |b| {
        b.iter(|| {
            rt.block_on(async {
                let executor =
                    FulfillmentExecutor::new(InMemoryInventoryStore::with_items([("widget", 50)]));
                let handles: Vec<_> = (0..50)
                    .map(|_| executor.fulfill_detached(request(OrderId::new())))
                    .collect();
                for handle in handles {
                    handle.await.unwrap().unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_fulfill_new_order,
    bench_fulfill_replay,
    bench_contended_item
);
criterion_main!(benches);
