use accum::AccountTable;
use anchor::{AnchorContract, LocalAnchor, MemoryStore};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use circuit::{assemble_batch, BatchProver, MockBackend, MockVerifier, PendingUpdate};
use primitives::ledger::anchor as ops;
use primitives::{field_to_base64, CommittedRoot, LedgerError, LedgerGateway, Player};

type Anchor = LocalAnchor<MemoryStore, MockVerifier>;

fn args(values: &[&str]) -> Vec<String> { values.iter().map(|v| v.to_string()).collect() }

fn table() -> AccountTable {
    let players = [(1, 100), (2, 200)].map(|(id, balance)| Player { id, balance, usd_balance: 0 });
    AccountTable::bootstrap(2, &players).unwrap()
}

async fn initialised(table: &AccountTable, backend: &MockBackend<2, 1>) -> Anchor {
    let anchor = LocalAnchor::new(AnchorContract::new(MemoryStore::new()));
    let vk = STANDARD.encode(backend.verifying_key().to_bytes());
    anchor.submit(ops::INIT, &args(&[&vk, &field_to_base64(&table.root())])).await.unwrap();
    anchor
}

async fn root_at(anchor: &Anchor, block: u64) -> Result<String, LedgerError> {
    let raw = anchor.evaluate(ops::QUERY_STATE_ROOT, &args(&[&block.to_string()])).await?;
    Ok(String::from_utf8(raw).unwrap())
}

#[tokio::test]
async fn empty_block_commits_unchanged_root() {
    let table = table();
    let backend = MockBackend::<2, 1>::new();
    let anchor = initialised(&table, &backend).await;
    let root = field_to_base64(&table.root());

    anchor.submit(ops::COMMIT_NO_CHANGE, &args(&["2", &root])).await.unwrap();
    assert_eq!(root_at(&anchor, 2).await.unwrap(), root);
    assert_eq!(root_at(&anchor, 1).await.unwrap(), root);
}

#[tokio::test]
async fn proof_with_foreign_old_root_is_rejected_without_writes() {
    let mut table = table();
    let backend = MockBackend::<2, 1>::new();
    let anchor = initialised(&table, &backend).await;

    let old = table.root();
    let update = PendingUpdate::from_transition(&table.apply_delta(1, 25).unwrap()).unwrap();
    let witness = assemble_batch::<2, 1>(old, &[update], &table).unwrap();
    let proof = STANDARD.encode(backend.prove(&witness).unwrap());
    let new = field_to_base64(&table.root());
    let stranger = field_to_base64(&pasta_curves::Fp::from(77));

    let before = anchor.with_contract(|c| c.store().clone()).unwrap();
    let err = anchor.submit(ops::COMMIT_PROOF, &args(&["2", &stranger, &new, &proof])).await.unwrap_err();
    assert!(matches!(err, LedgerError::Rejected { ref op, .. } if op == ops::COMMIT_PROOF));
    let after = anchor.with_contract(|c| c.store().clone()).unwrap();
    assert_eq!(before.keys().collect::<Vec<_>>(), after.keys().collect::<Vec<_>>());
    assert!(root_at(&anchor, 2).await.is_err());

    anchor.submit(ops::COMMIT_PROOF, &args(&["2", &field_to_base64(&old), &new, &proof])).await.unwrap();
    assert_eq!(root_at(&anchor, 2).await.unwrap(), new);
}

#[tokio::test]
async fn all_roots_listed_as_json() {
    let table = table();
    let backend = MockBackend::<2, 1>::new();
    let anchor = initialised(&table, &backend).await;
    let root = field_to_base64(&table.root());
    anchor.submit(ops::COMMIT_NO_CHANGE, &args(&["2", &root])).await.unwrap();

    let raw = anchor.evaluate(ops::QUERY_ALL_STATE_ROOTS, &[]).await.unwrap();
    let text = String::from_utf8(raw.clone()).unwrap();
    assert!(text.contains("\"blockId\":2"));
    let roots: Vec<CommittedRoot> = serde_json::from_slice(&raw).unwrap();
    assert_eq!(roots, vec![
        CommittedRoot { block_id: 1, root: root.clone() },
        CommittedRoot { block_id: 2, root },
    ]);
}

#[tokio::test]
async fn malformed_calls_are_refused() {
    let table = table();
    let backend = MockBackend::<2, 1>::new();
    let anchor = initialised(&table, &backend).await;
    let root = field_to_base64(&table.root());

    let evaluated = anchor.evaluate(ops::COMMIT_NO_CHANGE, &args(&["2", &root])).await;
    assert!(matches!(evaluated, Err(LedgerError::Rejected { .. })));
    assert!(root_at(&anchor, 2).await.is_err());

    let short = anchor.submit(ops::COMMIT_PROOF, &args(&["2", &root])).await;
    assert!(matches!(short, Err(LedgerError::Rejected { .. })));

    let bad_block = anchor.submit(ops::COMMIT_NO_CHANGE, &args(&["two", &root])).await;
    assert!(matches!(bad_block, Err(LedgerError::Rejected { .. })));

    let unknown = anchor.submit("Transfer", &[]).await;
    assert_eq!(unknown, Err(LedgerError::UnknownOperation("Transfer".into())));
}
