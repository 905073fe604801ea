/// Bulk writer integration tests
///
/// Partitioning, per-partition outcomes and failure isolation against an
/// isolated in-process server.
/// Run with: cargo test --test bulk_writer_tests

use docbulk::server::DUPLICATE_KEY_CODE;
use docbulk::{
    BulkWriteResult, BulkWriter, BulkWriterConfig, ConnectionConfig, ConnectionPool, DbError,
    DocumentServer, WorkerPool, doc,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_ready, task};

const DB: &str = "catapult";

#[derive(Debug, Clone)]
struct Account {
    id: u64,
    balance: u64,
}

fn accounts(count: u64) -> Vec<Account> {
    (0..count).map(|id| Account { id, balance: id * 10 }).collect()
}

async fn setup_with(
    num_workers: usize,
    pool_config: ConnectionConfig,
    config: BulkWriterConfig,
) -> (Arc<BulkWriter>, Arc<DocumentServer>) {
    let server = DocumentServer::new();
    let pool = ConnectionPool::new_with_server(pool_config, Arc::clone(&server))
        .await
        .unwrap();
    let workers = WorkerPool::current(num_workers).unwrap();
    let writer = BulkWriter::with_pool(pool, DB, &workers, config).unwrap();
    (writer, server)
}

async fn setup(num_workers: usize) -> (Arc<BulkWriter>, Arc<DocumentServer>) {
    setup_with(num_workers, ConnectionConfig::default(), BulkWriterConfig::default()).await
}

fn account_document(account: &Account, index: u32) -> docbulk::Document {
    doc! { "id": account.id, "balance": account.balance, "index": index }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_input_is_ready_without_connection() {
    let (writer, server) = setup(4).await;

    let handle = writer.bulk_insert("accounts", Vec::<Account>::new(), account_document);
    assert_eq!(handle.partition_count(), 0);

    let mut handle = task::spawn(handle);
    let outcomes = assert_ready!(handle.poll());

    assert!(outcomes.is_empty());
    assert_eq!(writer.pool().stats().total_connections, 0);
    assert_eq!(server.commands_served(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bulk_insert_one_to_one() {
    let (writer, server) = setup(3).await;

    let handle = writer.bulk_insert("accounts", accounts(10), account_document);
    assert_eq!(handle.partition_count(), 3);
    let outcomes = handle.await;

    assert_eq!(outcomes.len(), 3);
    let counts: Vec<u64> = outcomes.iter().map(|o| o.as_ref().unwrap().inserted).collect();
    assert_eq!(counts, vec![4, 3, 3]);
    assert_eq!(BulkWriteResult::aggregate_successes(&outcomes).inserted, 10);
    assert_eq!(server.commands_served(), 3);

    // global index passed to the mapper equals the entity position
    for id in 0..10u64 {
        let found = server.find(DB, "accounts", &doc! { "id": id }).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["index"], id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bulk_insert_one_to_many() {
    let (writer, server) = setup(2).await;

    let outcomes = writer
        .bulk_insert_many("transactions", accounts(5), |account: &Account, index| {
            (0..3).map(|seq| doc! { "owner": account.id, "seq": seq, "index": index }).collect()
        })
        .await;

    assert_eq!(BulkWriteResult::aggregate_successes(&outcomes).inserted, 15);

    let owned = server.find(DB, "transactions", &doc! { "owner": 4 }).await;
    let sequence: Vec<_> = owned.iter().map(|document| document["seq"].clone()).collect();
    assert_eq!(sequence, vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bulk_upsert_inserts_then_modifies() {
    let (writer, server) = setup(3).await;
    let filter = |account: &Account| doc! { "id": account.id };

    let outcomes = writer
        .bulk_upsert("accounts", accounts(6), account_document, filter)
        .await;
    let aggregate = BulkWriteResult::aggregate_successes(&outcomes);
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(aggregate.upserted, 6);
    assert_eq!(aggregate.modified, 0);

    let updated: Vec<Account> = accounts(6)
        .into_iter()
        .map(|account| Account {
            balance: account.balance + 1,
            ..account
        })
        .collect();
    let outcomes = writer
        .bulk_upsert("accounts", updated, account_document, filter)
        .await;
    let aggregate = BulkWriteResult::aggregate_successes(&outcomes);
    assert_eq!(aggregate.matched, 6);
    assert_eq!(aggregate.modified, 6);
    assert_eq!(aggregate.upserted, 0);

    assert_eq!(server.count_documents(DB, "accounts", &doc! {}).await, 6);
    assert_eq!(server.count_documents(DB, "accounts", &doc! { "balance": 11 }).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bulk_delete_removes_all_matching() {
    let (writer, server) = setup(2).await;

    let outcomes = writer
        .bulk_delete("accounts", accounts(3), |account: &Account| doc! { "id": account.id })
        .await;
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(BulkWriteResult::aggregate_successes(&outcomes).deleted, 0);

    // two documents per owner; delete must remove both
    writer
        .bulk_insert_many("accounts", accounts(4), |account: &Account, _| {
            vec![doc! { "id": account.id, "copy": 0 }, doc! { "id": account.id, "copy": 1 }]
        })
        .await;

    let outcomes = writer
        .bulk_delete("accounts", accounts(3), |account: &Account| doc! { "id": account.id })
        .await;
    assert_eq!(BulkWriteResult::aggregate_successes(&outcomes).deleted, 6);
    assert_eq!(server.count_documents(DB, "accounts", &doc! {}).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_partition_failure_is_isolated() {
    let (writer, server) = setup(2).await;
    server.create_unique_index(DB, "accounts", "id").await.unwrap();
    writer
        .bulk_insert("accounts", vec![Account { id: 0, balance: 0 }], account_document)
        .await;

    // 4 entities over 2 workers: partition 0 holds ids 0 and 1, id 0 already exists
    let outcomes = writer.bulk_insert("accounts", accounts(4), account_document).await;

    assert_eq!(outcomes.len(), 2);
    match &outcomes[0] {
        Err(DbError::CommandRejected {
            code, write_errors, ..
        }) => {
            assert_eq!(*code, DUPLICATE_KEY_CODE);
            assert_eq!(write_errors[0].index, 0);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(outcomes[0].as_ref().unwrap_err().description().is_some());
    assert_eq!(outcomes[1].as_ref().unwrap().inserted, 2);

    // ordered command: the rest of partition 0 was not applied
    assert_eq!(server.count_documents(DB, "accounts", &doc! { "id": 1 }).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mapper_panic_becomes_partition_failure() {
    let (writer, server) = setup(3).await;

    let outcomes = writer
        .bulk_insert("accounts", accounts(6), |account: &Account, index| {
            if account.id == 3 {
                panic!("cannot map account {}", account.id);
            }
            account_document(account, index)
        })
        .await;

    assert_eq!(outcomes.len(), 3);
    match &outcomes[1] {
        Err(DbError::MapperFailure {
            batch_index,
            message,
        }) => {
            assert_eq!(*batch_index, 1);
            assert!(message.contains("cannot map account 3"));
        }
        other => panic!("expected mapper failure, got {other:?}"),
    }
    assert_eq!(outcomes[0].as_ref().unwrap().inserted, 2);
    assert_eq!(outcomes[2].as_ref().unwrap().inserted, 2);
    assert_eq!(server.count_documents(DB, "accounts", &doc! {}).await, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_server_fails_every_partition() {
    let (writer, server) = setup(2).await;
    server.set_available(false);

    let outcomes = writer.bulk_insert("accounts", accounts(4), account_document).await;

    assert_eq!(outcomes.len(), 2);
    assert!(
        outcomes
            .iter()
            .all(|outcome| matches!(outcome, Err(DbError::ConnectionFailure(_))))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_in_flight_work_outlives_caller_handle() {
    let (writer, server) = setup(2).await;
    server.set_latency(Duration::from_millis(20));
    let weak = Arc::downgrade(&writer);

    let handle = writer.bulk_insert("accounts", accounts(8), account_document);
    drop(writer);
    let outcomes = handle.await;

    assert_eq!(BulkWriteResult::aggregate_successes(&outcomes).inserted, 8);
    for _ in 0..50 {
        if weak.upgrade().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(weak.upgrade().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_handle_still_completes_work() {
    let (writer, server) = setup(2).await;

    drop(writer.bulk_insert("accounts", accounts(6), account_document));

    for _ in 0..100 {
        if server.count_documents(DB, "accounts", &doc! {}).await == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.count_documents(DB, "accounts", &doc! {}).await, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_bounds_concurrent_commands() {
    let pool_config = ConnectionConfig::default().max_connections(2);
    let (writer, server) = setup_with(6, pool_config, BulkWriterConfig::default()).await;
    server.set_latency(Duration::from_millis(20));

    let outcomes = writer.bulk_insert("accounts", accounts(12), account_document).await;

    assert_eq!(outcomes.len(), 6);
    assert!(outcomes.iter().all(Result::is_ok));
    assert!(server.peak_in_flight() <= 2);
    assert!(writer.pool().stats().total_connections <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_partition_is_sent_in_sub_batches() {
    let config = BulkWriterConfig::default().max_batch_size(2);
    let (writer, server) = setup_with(1, ConnectionConfig::default(), config).await;

    let outcomes = writer.bulk_insert("accounts", accounts(5), account_document).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].as_ref().unwrap().inserted, 5);
    assert_eq!(server.commands_served(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_from_uri_uses_registered_deployment() {
    let workers = WorkerPool::current(2).unwrap();
    let writer = BulkWriter::create("memdoc://bulk-writer-tests:27017?maxPoolSize=2", DB, &workers)
        .await
        .unwrap();

    assert_eq!(writer.pool().config().max_connections, 2);
    let outcomes = writer.bulk_insert("accounts", accounts(3), account_document).await;
    assert!(outcomes.iter().all(Result::is_ok));

    let server = DocumentServer::for_endpoint("bulk-writer-tests:27017");
    assert_eq!(server.count_documents(DB, "accounts", &doc! {}).await, 3);

    assert!(matches!(
        BulkWriter::create("memdoc://bulk-writer-tests:27017", "", &workers).await,
        Err(DbError::InvalidConfig(_))
    ));
}

#[test]
fn test_in_flight_work_outlives_owned_worker_pool() {
    let server = DocumentServer::new();
    server.set_latency(Duration::from_millis(50));
    let workers = WorkerPool::new("bulk-writer-tests", 2).unwrap();
    let pool = workers
        .block_on(ConnectionPool::new_with_server(
            ConnectionConfig::default(),
            Arc::clone(&server),
        ))
        .unwrap();
    let writer = BulkWriter::with_pool(pool, DB, &workers, BulkWriterConfig::default()).unwrap();

    let handle = writer.bulk_insert("accounts", accounts(4), account_document);
    drop(writer);
    std::thread::sleep(Duration::from_millis(10));
    drop(workers);

    let caller = tokio::runtime::Runtime::new().unwrap();
    let outcomes = caller.block_on(handle);

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(BulkWriteResult::aggregate_successes(&outcomes).inserted, 4);
    assert_eq!(caller.block_on(server.count_documents(DB, "accounts", &doc! {})), 4);
}
