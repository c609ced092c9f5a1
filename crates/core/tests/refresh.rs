//! Health sweep: probing, url resync, and eviction.

mod support;

use std::sync::Arc;
use std::time::Duration;

use drover::keys;
use drover::model::{Requirements, fields};
use drover::nodes::StaticNodeSelector;
use drover::service::BrokerService;
use drover::store::{MemoryStore, WriteOp};
use support::{ConflictingStore, FakeDriver, fast_config};

fn broker_with(driver: Arc<FakeDriver>, nodes: &[&str]) -> BrokerService {
	BrokerService::new(
		fast_config(),
		Arc::new(MemoryStore::new()),
		Arc::new(StaticNodeSelector::new(nodes.iter().map(|n| n.to_string()).collect())),
		driver,
	)
}

#[tokio::test]
async fn sweep_evicts_sessions_on_dead_nodes_and_keeps_live_ones() {
	let driver = FakeDriver::new();
	let broker = broker_with(
		Arc::clone(&driver),
		&["http://node-a:4444/wd/hub", "http://node-b:4444/wd/hub"],
	);

	// Round-robin lands one session on each node.
	let on_a = broker.get_or_create(&Requirements::default(), true, false).await.unwrap();
	let on_b = broker.get_or_create(&Requirements::default(), true, false).await.unwrap();
	assert_ne!(on_a.node, on_b.node);

	driver.kill_node(&on_b.node);
	let report = broker.refresh_all().await;
	assert_eq!(report.checked, 2);
	assert_eq!(report.evicted, 1);
	assert_eq!(report.refreshed, 1);

	let remaining = broker.list().await.unwrap();
	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].id, on_a.id);
}

#[tokio::test]
async fn sweep_resyncs_current_url_from_the_node() {
	let driver = FakeDriver::new();
	let broker = broker_with(Arc::clone(&driver), &["http://node-a:4444/wd/hub"]);

	let view = broker.get_or_create(&Requirements::default(), false, false).await.unwrap();
	assert_eq!(view.current_url, None);

	// The session navigated on its own; only the sweep notices.
	driver.set_url(&view.id, "https://example.com/dashboard");
	broker.refresh_all().await;

	let refreshed = broker.get(&view.id).await.unwrap().unwrap();
	assert_eq!(refreshed.current_url.as_deref(), Some("https://example.com/dashboard"));
}

#[tokio::test]
async fn probe_timeout_counts_as_unhealthy() {
	let driver = FakeDriver::new();
	let broker = broker_with(Arc::clone(&driver), &["http://node-a:4444/wd/hub"]);

	let view = broker.get_or_create(&Requirements::default(), false, false).await.unwrap();
	driver.hang_probes(Duration::from_secs(2));

	let report = broker.refresh_all().await;
	assert_eq!(report.evicted, 1);
	assert!(broker.get(&view.id).await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_one_unknown_session_reports_false() {
	let driver = FakeDriver::new();
	let broker = broker_with(driver, &["http://node-a:4444/wd/hub"]);
	assert!(!broker.refresh_one("ghost").await.unwrap());
}

#[tokio::test]
async fn refresh_one_evicts_only_the_dead_session() {
	let driver = FakeDriver::new();
	let broker = broker_with(
		Arc::clone(&driver),
		&["http://node-a:4444/wd/hub", "http://node-b:4444/wd/hub"],
	);

	let on_a = broker.get_or_create(&Requirements::default(), true, false).await.unwrap();
	let on_b = broker.get_or_create(&Requirements::default(), true, false).await.unwrap();

	driver.kill_node(&on_b.node);
	assert!(!broker.refresh_one(&on_b.id).await.unwrap());
	assert!(broker.refresh_one(&on_a.id).await.unwrap());

	let remaining = broker.list().await.unwrap();
	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].id, on_a.id);
}

#[tokio::test]
async fn periodic_sweeper_runs_and_stops_on_shutdown() {
	let driver = FakeDriver::new();
	let broker = broker_with(Arc::clone(&driver), &["http://node-a:4444/wd/hub"]);

	let view = broker.get_or_create(&Requirements::default(), false, false).await.unwrap();
	broker.start_sweeper();

	driver.kill_node(&view.node);
	// fast_config sweeps every 50ms; two periods are plenty.
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(broker.list().await.unwrap().is_empty());

	broker.shutdown().await;
}

#[tokio::test]
async fn store_contention_on_one_session_never_aborts_the_sweep() {
	let driver = FakeDriver::new();
	let inner = MemoryStore::new();

	// Seed through an uncontended handle sharing the same store and driver.
	let seeder = BrokerService::new(
		fast_config(),
		Arc::new(inner.clone()),
		Arc::new(StaticNodeSelector::new(vec!["http://node-a:4444/wd/hub".to_string()])),
		driver.clone(),
	);
	let contended = seeder.get_or_create(&Requirements::default(), true, false).await.unwrap();
	let healthy = seeder.get_or_create(&Requirements::default(), true, false).await.unwrap();
	let mut pinned = Requirements::default();
	pinned.node = Some("http://node-b:4444/wd/hub".to_string());
	let doomed = seeder.get_or_create(&pinned, true, false).await.unwrap();

	driver.set_url(&contended.id, "https://one.example/");
	driver.set_url(&healthy.id, "https://two.example/");
	driver.kill_node(&doomed.node);

	// Every url resync for the first session loses to a concurrent writer.
	let interference = vec![WriteOp::HashSet {
		key: keys::session(&contended.id),
		field: fields::CURRENT_URL.to_string(),
		value: "https://elsewhere.example/".to_string(),
	}];
	let store = ConflictingStore::mutations_only(inner, u32::MAX, interference);
	let broker = BrokerService::new(
		fast_config(),
		Arc::new(store),
		Arc::new(StaticNodeSelector::new(vec!["http://node-a:4444/wd/hub".to_string()])),
		driver,
	);

	let report = broker.refresh_all().await;
	assert_eq!(report.checked, 3);
	assert_eq!(report.evicted, 1);
	// The contended session counts as refreshed: the swallowed write is a
	// per-session relaxation, not a probe failure.
	assert_eq!(report.refreshed, 2);

	// The dead session is gone, the healthy one got its resync, and the
	// contended one carries the concurrent writer's value, never a stale one.
	assert!(broker.get(&doomed.id).await.unwrap().is_none());
	let healthy = broker.get(&healthy.id).await.unwrap().unwrap();
	assert_eq!(healthy.current_url.as_deref(), Some("https://two.example/"));
	let contended = broker.get(&contended.id).await.unwrap().unwrap();
	assert_eq!(contended.current_url.as_deref(), Some("https://elsewhere.example/"));
}

#[tokio::test]
async fn empty_pool_sweep_is_a_quiet_no_op() {
	let driver = FakeDriver::new();
	let broker = broker_with(driver, &["http://node-a:4444/wd/hub"]);
	let report = broker.refresh_all().await;
	assert_eq!(report.checked, 0);
	assert_eq!(report.evicted, 0);
}
