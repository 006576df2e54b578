//! End-to-end runs against an in-memory store double.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use schema_transfer::{
    BreakStrategy, DependencyEdge, EdgeKind, MetadataSource, MismatchKind, ObjectAttrs, ObjectId,
    ObjectKind, Result, Row, RunStatus, SchemaObject, SecondPassUpdate, Snapshot, SourceStore,
    TargetStore, TaskStatus, TransferError, TransferOptions, TransferRunner, Value,
};

fn table(name: &str, rows: i64) -> SchemaObject {
    SchemaObject::new(
        "app",
        name,
        ObjectAttrs::Table {
            columns: Vec::new(),
            primary_key: Vec::new(),
            row_count: rows,
        },
    )
}

fn tid(name: &str) -> ObjectId {
    ObjectId::new("app", name, ObjectKind::Table)
}

fn fk(from: &str, to: &str) -> DependencyEdge {
    DependencyEdge::new(tid(from), tid(to), EdgeKind::ForeignKey)
}

fn int_rows(n: i64) -> Vec<Row> {
    (0..n).map(|i| vec![Value::Int(i)]).collect()
}

/// Acts as metadata, source, and target at once, recording every call so
/// tests can assert on ordering and side effects.
#[derive(Default)]
struct MemoryStore {
    snapshot: Snapshot,
    source_rows: Mutex<HashMap<ObjectId, Vec<Row>>>,

    // Fault injection
    fail_create: HashSet<ObjectId>,
    target_undercount: HashMap<ObjectId, i64>,
    read_delay: HashMap<ObjectId, Duration>,
    cancel_after_reads: Mutex<Option<(usize, watch::Sender<bool>)>>,

    // Observations
    call_log: Mutex<Vec<(&'static str, ObjectId)>>,
    created: Mutex<Vec<(ObjectId, bool)>>,
    target_rows: Mutex<HashMap<ObjectId, Vec<Row>>>,
    second_pass: Mutex<Vec<SecondPassUpdate>>,
    constraints_enabled: Mutex<Vec<ObjectId>>,
}

impl MemoryStore {
    fn new(snapshot: Snapshot) -> Self {
        let source_rows = snapshot
            .objects
            .iter()
            .filter(|o| o.has_data())
            .map(|o| (o.id(), int_rows(o.row_count())))
            .collect();
        Self {
            snapshot,
            source_rows: Mutex::new(source_rows),
            ..Default::default()
        }
    }

    fn creation_order(&self) -> Vec<ObjectId> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn created_disabled(&self, id: &ObjectId) -> bool {
        self.created
            .lock()
            .unwrap()
            .iter()
            .any(|(c, disabled)| c == id && *disabled)
    }
}

#[async_trait]
impl MetadataSource for MemoryStore {
    async fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.snapshot.clone())
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn row_count(&self, object: &ObjectId) -> Result<i64> {
        Ok(self
            .source_rows
            .lock()
            .unwrap()
            .get(object)
            .map(|r| r.len() as i64)
            .unwrap_or(0))
    }

    async fn read_batch(&self, object: &ObjectId, offset: i64, limit: usize) -> Result<Vec<Row>> {
        if let Some(delay) = self.read_delay.get(object) {
            tokio::time::sleep(*delay).await;
        }
        if let Some((remaining, tx)) = self.cancel_after_reads.lock().unwrap().as_mut() {
            if *remaining == 0 {
                let _ = tx.send(true);
            } else {
                *remaining -= 1;
            }
        }
        let rows = self.source_rows.lock().unwrap();
        let all = rows.get(object).cloned().unwrap_or_default();
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .collect())
    }

    async fn sample_rows(&self, object: &ObjectId, limit: usize) -> Result<Vec<Row>> {
        let rows = self.source_rows.lock().unwrap();
        let all = rows.get(object).cloned().unwrap_or_default();
        Ok(all.into_iter().take(limit).collect())
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn create_object(
        &self,
        object: &SchemaObject,
        constraints_disabled: bool,
    ) -> Result<()> {
        let id = object.id();
        if self.fail_create.contains(&id) {
            return Err(TransferError::store(format!("injected create failure for {}", id)));
        }
        self.call_log.lock().unwrap().push(("create", id.clone()));
        self.created.lock().unwrap().push((id, constraints_disabled));
        Ok(())
    }

    async fn write_batch(&self, object: &ObjectId, rows: Vec<Row>) -> Result<u64> {
        self.call_log.lock().unwrap().push(("write", object.clone()));
        let written = rows.len() as u64;
        self.target_rows
            .lock()
            .unwrap()
            .entry(object.clone())
            .or_default()
            .extend(rows);
        Ok(written)
    }

    async fn row_count(&self, object: &ObjectId) -> Result<i64> {
        let stored = self
            .target_rows
            .lock()
            .unwrap()
            .get(object)
            .map(|r| r.len() as i64)
            .unwrap_or(0);
        Ok(stored - self.target_undercount.get(object).copied().unwrap_or(0))
    }

    async fn sample_rows(&self, object: &ObjectId, limit: usize) -> Result<Vec<Row>> {
        let rows = self.target_rows.lock().unwrap();
        let all = rows.get(object).cloned().unwrap_or_default();
        Ok(all.into_iter().take(limit).collect())
    }

    async fn apply_second_pass(&self, update: &SecondPassUpdate) -> Result<u64> {
        self.second_pass.lock().unwrap().push(update.clone());
        Ok(1)
    }

    async fn enable_constraints(&self, object: &ObjectId) -> Result<()> {
        self.constraints_enabled.lock().unwrap().push(object.clone());
        Ok(())
    }
}

fn options() -> TransferOptions {
    TransferOptions {
        batch_size: 100,
        max_workers: Some(4),
        retry_limit: 0,
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

fn runner(store: Arc<MemoryStore>, options: TransferOptions) -> TransferRunner {
    TransferRunner::new(options, store.clone(), store.clone(), store)
}

#[tokio::test]
async fn test_cyclic_schema_transfers_with_deferred_fk() {
    // a <- b <- c <- d, plus a nullable FK on b pointing back at d.
    let store = Arc::new(MemoryStore::new(Snapshot {
        objects: vec![table("a", 10), table("b", 20), table("c", 30), table("d", 40)],
        edges: vec![
            fk("a", "b"),
            fk("b", "c"),
            fk("c", "d"),
            fk("d", "b").breakable(vec!["d_id".into()]),
        ],
    }));

    let report = runner(store.clone(), options()).run(None, None).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    report.ensure_success().unwrap();
    assert_eq!(report.rows_transferred, 100);
    assert!(report.problems.is_empty());
    assert!(report.mismatches.is_empty());

    // The nullable edge was the one deferred.
    assert_eq!(report.cycles.cycles.len(), 1);
    let cycle = &report.cycles.cycles[0];
    assert_eq!(cycle.strategy, BreakStrategy::DeferNullableFk);
    assert_eq!(cycle.suspended.from, tid("d"));
    assert_eq!(cycle.suspended.to, tid("b"));

    // Strict creation order once the cycle is broken.
    assert_eq!(
        store.creation_order(),
        vec![tid("a"), tid("b"), tid("c"), tid("d")]
    );

    // The deferred columns were filled in after everything existed.
    let second_pass = store.second_pass.lock().unwrap().clone();
    assert_eq!(second_pass.len(), 1);
    assert_eq!(second_pass[0].object, tid("b"));
    assert_eq!(second_pass[0].target, tid("d"));
    assert_eq!(second_pass[0].columns, vec!["d_id".to_string()]);

    // Every table verified against the source.
    for result in &report.results {
        assert_eq!(result.status, TaskStatus::Succeeded);
        assert_eq!(result.rows_target, Some(result.rows_source));
    }
}

#[tokio::test]
async fn test_dependencies_created_before_dependents() {
    let store = Arc::new(MemoryStore::new(Snapshot {
        objects: vec![table("parent", 5), table("child", 5), table("grandchild", 5)],
        edges: vec![fk("parent", "child"), fk("child", "grandchild")],
    }));

    let report = runner(store.clone(), options()).run(None, None).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);

    let order = store.creation_order();
    let pos = |name: &str| order.iter().position(|id| id == &tid(name)).unwrap();
    assert!(pos("parent") < pos("child"));
    assert!(pos("child") < pos("grandchild"));
}

#[tokio::test]
async fn test_level_barrier_waits_for_slowest_sibling() {
    // Level 0: slow, quick, bad (concurrent). Level 1: child of slow+quick,
    // orphaned dependent of bad. The slow table drags its level out with a
    // delay on every batch read.
    let mut store = MemoryStore::new(Snapshot {
        objects: vec![
            table("slow", 300),
            table("quick", 10),
            table("bad", 10),
            table("child", 10),
            table("orphaned", 10),
        ],
        edges: vec![
            fk("slow", "child"),
            fk("quick", "child"),
            fk("bad", "orphaned"),
        ],
    });
    store.fail_create.insert(tid("bad"));
    store.read_delay.insert(tid("slow"), Duration::from_millis(30));
    let store = Arc::new(store);

    let report = runner(
        store.clone(),
        TransferOptions {
            continue_on_error: true,
            ..options()
        },
    )
    .run(None, None)
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Partial);

    // No level-1 work starts before every level-0 task is terminal: the
    // child's create must come after the slow sibling's last batch write.
    let log = store.call_log.lock().unwrap().clone();
    let child_create = log
        .iter()
        .position(|(op, id)| *op == "create" && id == &tid("child"))
        .unwrap();
    let slow_last_write = log
        .iter()
        .rposition(|(op, id)| *op == "write" && id == &tid("slow"))
        .unwrap();
    let quick_last_write = log
        .iter()
        .rposition(|(op, id)| *op == "write" && id == &tid("quick"))
        .unwrap();
    assert!(child_create > slow_last_write);
    assert!(child_create > quick_last_write);

    // The level-0 failure only poisons its own branch; the unrelated
    // level-1 object still transfers.
    let status_of = |name: &str| {
        report
            .results
            .iter()
            .find(|r| r.object == tid(name))
            .unwrap()
            .status
    };
    assert_eq!(status_of("slow"), TaskStatus::Succeeded);
    assert_eq!(status_of("quick"), TaskStatus::Succeeded);
    assert_eq!(status_of("bad"), TaskStatus::Failed);
    assert_eq!(status_of("child"), TaskStatus::Succeeded);
    assert_eq!(status_of("orphaned"), TaskStatus::Skipped);
}

#[tokio::test]
async fn test_failure_skips_dependents_and_continues_elsewhere() {
    let mut store = MemoryStore::new(Snapshot {
        objects: vec![table("solo", 5), table("bad", 5), table("dependent", 5)],
        edges: vec![fk("bad", "dependent")],
    });
    store.fail_create.insert(tid("bad"));
    let store = Arc::new(store);

    let report = runner(
        store.clone(),
        TransferOptions {
            continue_on_error: true,
            ..options()
        },
    )
    .run(None, None)
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Partial);

    let status_of = |name: &str| {
        report
            .results
            .iter()
            .find(|r| r.object == tid(name))
            .unwrap()
            .status
    };
    assert_eq!(status_of("solo"), TaskStatus::Succeeded);
    assert_eq!(status_of("bad"), TaskStatus::Failed);
    assert_eq!(status_of("dependent"), TaskStatus::Skipped);

    let skipped = report
        .results
        .iter()
        .find(|r| r.object == tid("dependent"))
        .unwrap();
    assert!(skipped.errors[0].contains("bad"));

    // Nothing was created for the failed branch.
    assert!(!store.creation_order().contains(&tid("bad")));
    assert!(!store.creation_order().contains(&tid("dependent")));
}

#[tokio::test]
async fn test_failure_halts_run_without_continue_on_error() {
    let mut store = MemoryStore::new(Snapshot {
        objects: vec![table("bad", 5), table("after", 5), table("later", 5)],
        edges: vec![fk("bad", "after"), fk("after", "later")],
    });
    store.fail_create.insert(tid("bad"));
    let store = Arc::new(store);

    let report = runner(store.clone(), options()).run(None, None).await.unwrap();

    // Nothing succeeded at all.
    assert_eq!(report.status, RunStatus::Failed);
    for result in &report.results {
        assert_ne!(result.status, TaskStatus::Succeeded);
    }
    assert!(store.creation_order().is_empty());
}

#[tokio::test]
async fn test_row_count_mismatch_degrades_to_partial() {
    let mut store = MemoryStore::new(Snapshot {
        objects: vec![table("t", 500)],
        edges: Vec::new(),
    });
    // Target reports two rows fewer than were written.
    store.target_undercount.insert(tid("t"), 2);
    let store = Arc::new(store);

    let report = runner(store, options()).run(None, None).await.unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert!(matches!(
        report.ensure_success(),
        Err(TransferError::Validation(_))
    ));
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].object, tid("t"));
    assert_eq!(
        report.mismatches[0].kind,
        MismatchKind::RowCount {
            source: 500,
            target: 498
        }
    );

    // The transfer itself still succeeded; only verification disagreed.
    assert_eq!(report.results[0].status, TaskStatus::Succeeded);
    assert_eq!(report.results[0].rows_transferred, 500);
    assert_eq!(report.results[0].rows_target, Some(498));
}

#[tokio::test]
async fn test_cancellation_stops_between_batches() {
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let store = MemoryStore::new(Snapshot {
        objects: vec![table("big", 1000)],
        edges: Vec::new(),
    });
    // Raise the signal from inside the source after three batch reads.
    *store.cancel_after_reads.lock().unwrap() = Some((3, cancel_tx));
    let store = Arc::new(store);

    let report = runner(store.clone(), options())
        .run(Some(cancel_rx), None)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(matches!(
        report.ensure_success(),
        Err(TransferError::Cancelled)
    ));
    let result = &report.results[0];
    assert_eq!(result.status, TaskStatus::Skipped);
    assert!(result.errors[0].contains("cancelled"));

    // Whole batches only; no partial batch landed.
    assert!(report.rows_transferred % 100 == 0);
    assert!(report.rows_transferred < 1000);
    let landed = store.target_rows.lock().unwrap()[&tid("big")].len() as i64;
    assert_eq!(landed, report.rows_transferred);
}

#[tokio::test]
async fn test_cancelled_before_start_skips_everything() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();

    let store = Arc::new(MemoryStore::new(Snapshot {
        objects: vec![table("a", 5), table("b", 5)],
        edges: vec![fk("a", "b")],
    }));

    let report = runner(store.clone(), options())
        .run(Some(cancel_rx), None)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report
        .results
        .iter()
        .all(|r| r.status == TaskStatus::Skipped));
    assert!(store.creation_order().is_empty());
}

#[tokio::test]
async fn test_unbreakable_cycle_disables_and_reenables_constraints() {
    // Pure cycle, no nullable edges anywhere.
    let store = Arc::new(MemoryStore::new(Snapshot {
        objects: vec![table("x", 5), table("y", 5)],
        edges: vec![fk("x", "y"), fk("y", "x")],
    }));

    let report = runner(store.clone(), options()).run(None, None).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);

    let cycle = &report.cycles.cycles[0];
    assert_eq!(cycle.strategy, BreakStrategy::DisableConstraint);
    let flagged = cycle.suspended.to.clone();

    assert!(store.created_disabled(&flagged));
    assert_eq!(
        store.constraints_enabled.lock().unwrap().clone(),
        vec![flagged]
    );
    assert!(store.second_pass.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_progress_events_track_object_lifecycle() {
    let store = Arc::new(MemoryStore::new(Snapshot {
        objects: vec![table("t", 250)],
        edges: Vec::new(),
    }));

    let (tx, mut rx) = mpsc::channel(64);
    let report = runner(store, options()).run(None, Some(tx)).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    // Pending on enqueue, Running once a worker picks the task up.
    assert_eq!(events[0].status, TaskStatus::Pending);
    assert_eq!(events[1].status, TaskStatus::Running);
    let last = events.last().unwrap();
    assert_eq!(last.status, TaskStatus::Succeeded);
    assert_eq!(last.rows_so_far, 250);

    // Row counts on the stream never go backwards.
    let rows: Vec<i64> = events.iter().map(|e| e.rows_so_far).collect();
    assert!(rows.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_plan_preview_matches_run_without_side_effects() {
    let store = Arc::new(MemoryStore::new(Snapshot {
        objects: vec![table("a", 5), table("b", 5)],
        edges: vec![fk("a", "b")],
    }));

    let (plan, cycles, problems) = runner(store.clone(), options())
        .plan_preview()
        .await
        .unwrap();

    assert_eq!(plan.levels.len(), 2);
    assert_eq!(plan.object_count(), 2);
    assert!(cycles.is_empty());
    assert!(problems.is_empty());

    // Preview touched nothing on the target.
    assert!(store.creation_order().is_empty());
    assert!(store.target_rows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_dangling_edge_reported_but_run_succeeds() {
    let store = Arc::new(MemoryStore::new(Snapshot {
        objects: vec![table("real", 5)],
        edges: vec![fk("ghost", "real")],
    }));

    let report = runner(store, options()).run(None, None).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.problems.len(), 1);
    assert_eq!(report.problems[0].missing.as_ref(), Some(&tid("ghost")));
}

#[tokio::test]
async fn test_sample_verification_finds_divergent_row() {
    let store = Arc::new(MemoryStore::new(Snapshot {
        objects: vec![table("t", 10)],
        edges: Vec::new(),
    }));
    // Stale rows already present in the target; the transfer appends after
    // them, so the sampled head of the table diverges from the source.
    store
        .target_rows
        .lock()
        .unwrap()
        .insert(tid("t"), vec![vec![Value::Int(999)]]);

    let report = runner(
        store,
        TransferOptions {
            verify_sample_rows: 5,
            ..options()
        },
    )
    .run(None, None)
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    // Counts disagree (11 vs 10) and the first sampled row differs.
    assert!(report
        .mismatches
        .iter()
        .any(|m| m.kind == MismatchKind::RowCount { source: 10, target: 11 }));
    assert!(report
        .mismatches
        .iter()
        .any(|m| m.kind == MismatchKind::SampleRow { row: 0, column: 0 }));
}
