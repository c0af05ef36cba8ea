use std::sync::Arc;
use std::time::Duration;

use sourceql_core::ast::query::{
    InsertStatement, OrderByTerm, SelectItem, SelectQuery, SourceRef, Statement,
};
use sourceql_core::ast::{
    and, context, eq, field, function_target, gt, lit, member, mul, qualified,
};
use sourceql_core::config::{EngineConfig, SchedulerConfig};
use sourceql_core::context::StaticExecutionContext;
use sourceql_core::datasource::SourceRegistry;
use sourceql_core::datasource::memory::{MemorySource, MemoryTarget};
use sourceql_core::engine::Engine;
use sourceql_core::scalar::ScalarValue;
use sourceql_core::scheduler::{QueryJob, Scheduler};
use sourceql_core::trigger::{AfterJobTrigger, Trigger};

fn customers() -> Arc<MemorySource> {
    Arc::new(MemorySource::from_records(
        "customers",
        [
            vec![("id", ScalarValue::from(1)), ("name", "ann".into())],
            vec![("id", 2.into()), ("name", "bob".into())],
            vec![("id", 3.into()), ("name", "cat".into())],
        ],
    ))
}

fn orders() -> Arc<MemorySource> {
    Arc::new(MemorySource::from_records(
        "orders",
        [
            vec![("customer_id", ScalarValue::from(1)), ("total", 10.into())],
            vec![("customer_id", 1.into()), ("total", 45.into())],
            vec![("customer_id", 2.into()), ("total", 30.into())],
            vec![("customer_id", 3.into()), ("total", 5.into())],
        ],
    ))
}

/// Orders above `@min_total` joined with their customer, biggest first.
fn big_orders() -> SelectQuery {
    SelectQuery {
        items: vec![
            SelectItem::expr(qualified("c", "name")),
            SelectItem::aliased(mul(qualified("o", "total"), lit(2)), "doubled"),
        ],
        sources: vec![
            SourceRef::new("customers", "c"),
            SourceRef::new("orders", "o"),
        ],
        filter: Some(and(
            eq(qualified("c", "id"), qualified("o", "customer_id")),
            gt(qualified("o", "total"), member(context(), "min_total")),
        )),
        order_by: vec![OrderByTerm::desc(qualified("o", "total"))],
        limit: None,
    }
}

#[tokio::test]
async fn join_with_pushdown() {
    logutil::init_test();

    let orders = orders();
    let engine = Engine::new(
        SourceRegistry::new()
            .with_source(customers())
            .with_source(orders.clone()),
        EngineConfig::default(),
    );
    let ctx = StaticExecutionContext::new()
        .with_value("min_total", 8)
        .into_arc();

    let rows = engine
        .execute(&Statement::Select(big_orders()), ctx)
        .await
        .unwrap()
        .into_rows()
        .await
        .unwrap();

    let rendered: Vec<_> = rows.iter().map(|row| row.to_string()).collect();
    assert_eq!(
        vec![
            "{name: ann, doubled: 90}",
            "{name: bob, doubled: 60}",
            "{name: ann, doubled: 20}",
        ],
        rendered
    );

    // The context value was bound before the filter reached the source.
    let pushed = orders.last_scan().unwrap();
    assert_eq!(Some(&gt(qualified("o", "total"), lit(8))), pushed.filter());
}

#[tokio::test]
async fn unknown_source_fails_planning() {
    logutil::init_test();

    let engine = Engine::new(SourceRegistry::new(), EngineConfig::default());
    let query = SelectQuery {
        items: vec![SelectItem::expr(field("x"))],
        sources: vec![SourceRef::new("missing", "m")],
        ..Default::default()
    };
    let result = engine
        .execute(
            &Statement::Select(query),
            StaticExecutionContext::new().into_arc(),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn scheduled_insert_chains_report() {
    logutil::init_test();

    let archive = Arc::new(MemoryTarget::new("archive"));
    let archive_source = Arc::new(MemorySource::from_records(
        "archive_view",
        [vec![("name", ScalarValue::from("ann"))]],
    ));
    let engine = Arc::new(Engine::new(
        SourceRegistry::new()
            .with_source(customers())
            .with_source(orders())
            .with_source(archive_source.clone())
            .with_target(archive.clone()),
        EngineConfig::default(),
    ));
    let ctx = StaticExecutionContext::new()
        .with_value("min_total", 40)
        .into_arc();

    let load = engine
        .prepare(&Statement::Insert(InsertStatement {
            target: function_target("archive", Vec::new()),
            query: big_orders(),
        }))
        .unwrap();
    let report = engine
        .prepare(&Statement::Select(SelectQuery {
            items: vec![SelectItem::Wildcard { source: None }],
            sources: vec![SourceRef::new("archive_view", "a")],
            ..Default::default()
        }))
        .unwrap();

    let scheduler = Scheduler::try_new(&SchedulerConfig::default()).unwrap();
    scheduler
        .add_interval_job(
            Arc::new(QueryJob::new("load", engine.clone(), load, ctx.clone())),
            Some(Duration::from_millis(100)),
        )
        .unwrap();
    let after_load: Arc<dyn Trigger> = Arc::new(AfterJobTrigger::new("LOAD"));
    scheduler
        .add_job(
            Arc::new(QueryJob::new("report", engine, report, ctx)),
            vec![after_load.clone()],
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    scheduler.close().await.unwrap();

    // Loads ran at 100ms and 200ms, each followed by a report.
    let written = archive.rows();
    assert_eq!(2, written.len());
    assert_eq!(Some(&ScalarValue::from(90)), written[0].value("doubled"));
    assert_eq!(2, archive_source.scan_count());
    assert!(!after_load.is_armed());
}
