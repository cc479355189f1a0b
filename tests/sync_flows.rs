use async_trait::async_trait;
use opsboard_sync::{
    AddMemberPayload, ChangeEvent, ChangeOp, CreateCommentPayload, CreateTaskPayload, Filter,
    GatewayError, GatewayRequest, Identity, RemoteGateway, SyncContext, SyncError, Table,
    TaskPatch,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory stand-in for the hosted data service: real row storage per
/// table, scripted failures and latency for the next call.
#[derive(Default)]
struct MockGateway {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    next_id: AtomicUsize,
    fail_next: Mutex<Option<GatewayError>>,
    delay_next: Mutex<Option<Duration>>,
}

impl MockGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn seed(&self, table: Table, rows: Vec<Value>) {
        self.tables.lock().expect("tables lock").insert(table, rows);
    }

    fn fail_next(&self, error: GatewayError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    fn delay_next(&self, delay: Duration) {
        *self.delay_next.lock().expect("delay lock") = Some(delay);
    }

    fn rows(&self, table: Table) -> Vec<Value> {
        self.tables
            .lock()
            .expect("tables lock")
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn execute(&self, request: GatewayRequest) -> Result<Vec<Value>, GatewayError> {
        let delay = self.delay_next.lock().expect("delay lock").take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.fail_next.lock().expect("fail lock").take() {
            return Err(error);
        }

        let mut tables = self.tables.lock().expect("tables lock");
        match request {
            GatewayRequest::Select { table, filter } => {
                let rows = tables.get(&table).cloned().unwrap_or_default();
                Ok(rows
                    .into_iter()
                    .filter(|row| matches_filter(row, filter.as_ref()))
                    .collect())
            }
            GatewayRequest::Insert { table, payload } => {
                let mut row = payload;
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                row["id"] = json!(format!("srv-{id}"));
                if table == Table::ProjectRoster {
                    row["joined_at"] = json!("2024-01-05T09:30:00Z");
                } else if row.get("created_at").is_none() {
                    row["created_at"] = json!("2024-01-05T09:30:00Z");
                }
                tables.entry(table).or_default().push(row.clone());
                Ok(vec![row])
            }
            GatewayRequest::Update { table, id, payload } => {
                let target = json!(id);
                let rows = tables.entry(table).or_default();
                let Some(row) = rows.iter_mut().find(|row| row["id"] == target) else {
                    return Err(GatewayError::new("PGRST116", "row not found"));
                };
                if let Some(fields) = payload.as_object() {
                    for (key, value) in fields {
                        row[key] = value.clone();
                    }
                }
                Ok(vec![row.clone()])
            }
            GatewayRequest::Delete { table, id } => {
                let target = json!(id);
                let rows = tables.entry(table).or_default();
                rows.retain(|row| row["id"] != target);
                Ok(Vec::new())
            }
        }
    }
}

fn matches_filter(row: &Value, filter: Option<&Filter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    row.get(&filter.column) == Some(&json!(filter.value))
}

fn identity() -> Identity {
    Identity {
        user_id: "u1".to_string(),
        display_name: "Dana".to_string(),
        avatar_url: None,
    }
}

fn task_row(id: &str, name: &str, status: &str) -> Value {
    json!({
        "id": id,
        "project_id": "p1",
        "task_name": name,
        "description": null,
        "status": status,
        "position": 1.0,
        "started_at": "2024-01-01",
        "due_date": "2024-01-10",
        "created_by": "u1",
        "created_at": "2024-01-01T08:00:00Z",
    })
}

fn create_task_payload(name: &str) -> CreateTaskPayload {
    CreateTaskPayload {
        task_name: name.to_string(),
        description: None,
        status: None,
        started_at: Some("2024-01-01".parse().expect("date")),
        due_date: Some("2024-01-10".parse().expect("date")),
    }
}

#[tokio::test(start_paused = true)]
async fn failed_create_appears_then_rolls_back() {
    let gateway = MockGateway::new();
    let ctx = SyncContext::new(gateway.clone(), identity());
    let tasks = Arc::new(opsboard_sync::TasksView::mount(&ctx, "p1").await);
    assert!(tasks.items().is_empty());

    gateway.delay_next(Duration::from_millis(100));
    gateway.fail_next(GatewayError::new("PGRST301", "insert rejected"));

    let pending = {
        let tasks = tasks.clone();
        tokio::spawn(async move { tasks.create_task(create_task_payload("Draft budget")).await })
    };

    // The optimistic row is visible while the remote call is still in flight.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mid_flight = tasks.items();
    assert_eq!(mid_flight.len(), 1);
    assert_eq!(mid_flight[0].task_name, "Draft budget");
    assert!(opsboard_sync::is_temp_id(&mid_flight[0].id));

    // Resolution: rollback plus a surfaced remote failure.
    let result = pending.await.expect("join create");
    assert!(matches!(result, Err(SyncError::Remote { .. })));
    assert!(tasks.items().is_empty());

    ctx.shutdown();
}

#[tokio::test(start_paused = true)]
async fn successful_create_settles_on_the_canonical_row() {
    let gateway = MockGateway::new();
    let ctx = SyncContext::new(gateway.clone(), identity());
    let tasks = opsboard_sync::TasksView::mount(&ctx, "p1").await;

    let created = tasks
        .create_task(create_task_payload("Draft budget"))
        .await
        .expect("create task");

    assert!(created.id.starts_with("srv-"));
    let items = tasks.items();
    assert_eq!(items.len(), 1, "temp and canonical rows never coexist");
    assert_eq!(items[0].id, created.id);

    ctx.shutdown();
}

#[tokio::test(start_paused = true)]
async fn duplicate_comment_notification_merges_into_one_entry() {
    let gateway = MockGateway::new();
    let ctx = SyncContext::new(gateway.clone(), identity());
    let comments = opsboard_sync::CommentsView::mount(&ctx, "t1").await;

    let created = comments
        .create_comment(CreateCommentPayload {
            body: "Looks good".to_string(),
        })
        .await
        .expect("create comment");

    // The feed replays the same insert after the mutation already confirmed.
    let canonical = gateway.rows(Table::TaskComments)[0].clone();
    ctx.feed().publish(ChangeEvent {
        table: Table::TaskComments,
        op: ChangeOp::Insert,
        row: canonical,
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let items = comments.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, created.id);
    assert_eq!(items[0].body, "Looks good");

    ctx.shutdown();
}

#[tokio::test(start_paused = true)]
async fn mutation_feed_and_poll_converge_in_any_order() {
    async fn run_order(feed_before_poll: bool) -> Vec<opsboard_sync::Task> {
        let gateway = MockGateway::new();
        gateway.seed(Table::Tasks, vec![task_row("t1", "Original", "To Do")]);
        let ctx = SyncContext::new(gateway.clone(), identity());
        let tasks = opsboard_sync::TasksView::mount(&ctx, "p1").await;

        tasks
            .update_task(
                "t1",
                TaskPatch {
                    task_name: Some("Renamed".to_string()),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("update task");

        let echo = ChangeEvent {
            table: Table::Tasks,
            op: ChangeOp::Update,
            row: gateway.rows(Table::Tasks)[0].clone(),
        };
        if feed_before_poll {
            ctx.feed().publish(echo);
            tokio::time::sleep(Duration::from_millis(10)).await;
            tasks.refetch().await.expect("refetch");
        } else {
            tasks.refetch().await.expect("refetch");
            ctx.feed().publish(echo);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let items = tasks.items();
        ctx.shutdown();
        items
    }

    let first = run_order(true).await;
    let second = run_order(false).await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].task_name, "Renamed");
}

#[tokio::test(start_paused = true)]
async fn roster_mutation_invalidates_the_manpower_aggregate() {
    let gateway = MockGateway::new();
    let ctx = SyncContext::new(gateway.clone(), identity());
    let manpower = opsboard_sync::ManpowerView::mount(&ctx, "p1").await;
    let roster = opsboard_sync::RosterView::mount(&ctx, "p1").await;
    assert!(manpower.items().is_empty());

    // The server recomputes the aggregate as a side effect of the roster
    // change; only a refetch can pick it up.
    gateway.seed(
        Table::Manpower,
        vec![json!({
            "id": "m1",
            "project_id": "p1",
            "day": "2024-01-05",
            "allocated_headcount": 3,
            "required_headcount": 5,
        })],
    );
    roster
        .add_member(AddMemberPayload {
            user_id: "u2".to_string(),
            member_name: "Robin".to_string(),
            role: "engineer".to_string(),
        })
        .await
        .expect("add member");

    // Bus -> refetcher -> settle delay; well before the first 5 s poll tick.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let aggregate = manpower.items();
    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate[0].allocated_headcount, 3);

    ctx.shutdown();
}

#[tokio::test(start_paused = true)]
async fn hidden_views_catch_up_when_visible_again() {
    let gateway = MockGateway::new();
    gateway.seed(Table::Tasks, vec![task_row("t1", "Original", "To Do")]);
    let ctx = SyncContext::new(gateway.clone(), identity());
    let tasks = opsboard_sync::TasksView::mount(&ctx, "p1").await;
    assert_eq!(tasks.items().len(), 1);

    ctx.visibility().set_visible(false);
    gateway.seed(
        Table::Tasks,
        vec![
            task_row("t1", "Original", "To Do"),
            task_row("t2", "Added while hidden", "To Do"),
        ],
    );

    // Parked: a minute passes without any poll picking up the change.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(tasks.items().len(), 1);

    // One unthrottled refetch on the hidden-to-visible transition.
    ctx.visibility().set_visible(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tasks.items().len(), 2);

    ctx.shutdown();
}

#[tokio::test(start_paused = true)]
async fn unmounting_releases_every_feed_subscription() {
    let gateway = MockGateway::new();
    let ctx = SyncContext::new(gateway.clone(), identity());
    let tasks = opsboard_sync::TasksView::mount(&ctx, "p1").await;
    let comments = opsboard_sync::CommentsView::mount(&ctx, "t1").await;
    assert_eq!(ctx.feed().subscription_count(), 2);

    tasks.unmount();
    comments.unmount();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ctx.feed().subscription_count(), 0);

    ctx.shutdown();
}

#[tokio::test(start_paused = true)]
async fn status_updates_reject_unknown_columns() {
    let gateway = MockGateway::new();
    gateway.seed(Table::Tasks, vec![task_row("t1", "Original", "To Do")]);
    let ctx = SyncContext::new(gateway.clone(), identity());
    let tasks = opsboard_sync::TasksView::mount(&ctx, "p1").await;

    let result = tasks.set_task_status("t1", "Backlog").await;
    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert_eq!(tasks.items()[0].status, opsboard_sync::TaskStatus::ToDo);

    let moved = tasks.set_task_status("t1", "In Progress").await.expect("move");
    assert_eq!(moved.status, opsboard_sync::TaskStatus::InProgress);

    ctx.shutdown();
}
