mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use asset_hunter::dns::DnsRecordType;
use asset_hunter::event::TAG_TARGET;
use asset_hunter::modules::{ModuleKind, QueuedModule};
use asset_hunter::{EmitOptions, Event, EventModule, EventType, Scan};

use common::{fast_config, Recorder, StaticResolver};

fn scan_with(resolver: StaticResolver, blacklist: &[&str]) -> Arc<Scan> {
    Scan::builder("pipeline")
        .config(fast_config())
        .targets(["example.com"])
        .blacklist(blacklist.iter().copied())
        .resolver(Arc::new(resolver))
        .module(QueuedModule::shared(Recorder::output("out")))
        .build()
        .unwrap()
}

fn name_event(scan: &Scan, value: &str, permits: &Arc<Semaphore>) -> Arc<Event> {
    let permit = permits.clone().try_acquire_owned().unwrap();
    Arc::new(
        scan.make_event(value, EventType::DnsName, EventModule::new("test", ModuleKind::Scan), scan.root_event())
            .unwrap()
            .with_permit(permit),
    )
}

async fn settled(event: &Event) {
    tokio::time::timeout(Duration::from_secs(5), event.resolved().wait())
        .await
        .expect("event never resolved");
}

#[tokio::test]
async fn permit_and_signal_settle_on_success() {
    let scan = scan_with(StaticResolver::default(), &[]);
    let permits = Arc::new(Semaphore::new(1));
    let event = name_event(&scan, "www.example.com", &permits);
    assert!(event.holds_permit());

    assert!(scan.emit_event(event.clone(), EmitOptions::default()));
    settled(&event).await;
    assert_eq!(permits.available_permits(), 1);
    assert!(!event.holds_permit());
    assert_eq!(scan.event_queue().len(), 1);
    assert_eq!(scan.stats().emitted("test", EventType::DnsName), 1);
    assert_eq!(event.scope_distance(), 0);
}

#[tokio::test]
async fn permit_and_signal_settle_on_abort_if() {
    let scan = scan_with(StaticResolver::default(), &[]);
    let permits = Arc::new(Semaphore::new(1));
    let event = name_event(&scan, "www.example.com", &permits);
    let successes = Arc::new(AtomicUsize::new(0));
    let counter = successes.clone();

    let options = EmitOptions::default().abort_if(|_| true).on_success(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    scan.emit_event(event.clone(), options);
    settled(&event).await;
    assert_eq!(permits.available_permits(), 1);
    assert!(scan.event_queue().is_empty());
    assert_eq!(successes.load(Ordering::SeqCst), 0);
    assert_eq!(scan.stats().emitted("test", EventType::DnsName), 0);
}

#[tokio::test]
async fn permit_and_signal_settle_when_a_callback_panics() {
    let scan = scan_with(StaticResolver::default(), &[]);
    let permits = Arc::new(Semaphore::new(1));
    let event = name_event(&scan, "www.example.com", &permits);

    scan.emit_event(event.clone(), EmitOptions::default().abort_if(|_| panic!("bad predicate")));
    settled(&event).await;
    assert_eq!(permits.available_permits(), 1);
    assert!(scan.event_queue().is_empty());
}

#[tokio::test]
async fn permit_and_signal_settle_when_blacklisted() {
    let resolver = StaticResolver::default().with("www.example.com", DnsRecordType::A, &["10.9.9.9"]);
    let scan = scan_with(resolver, &["10.0.0.0/8"]);
    let permits = Arc::new(Semaphore::new(1));
    let event = name_event(&scan, "www.example.com", &permits);
    let successes = Arc::new(AtomicUsize::new(0));
    let counter = successes.clone();

    scan.emit_event(
        event.clone(),
        EmitOptions::default().on_success(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    settled(&event).await;
    assert!(event.has_tag("blacklisted"));
    assert_eq!(permits.available_permits(), 1);
    assert!(scan.event_queue().is_empty());
    assert_eq!(successes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn on_success_fires_once_when_queued() {
    let scan = scan_with(StaticResolver::default(), &[]);
    let permits = Arc::new(Semaphore::new(2));
    let successes = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let event = name_event(&scan, "api.example.com", &permits);
        let counter = successes.clone();
        scan.emit_event(
            event.clone(),
            EmitOptions::default().on_success(move |e| {
                assert_eq!(e.value(), "api.example.com");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        settled(&event).await;
    }
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(permits.available_permits(), 2);
}

#[tokio::test]
async fn child_waits_for_its_parent() {
    let scan = scan_with(StaticResolver::default(), &[]);
    let parent = Arc::new(
        scan.make_event("other.net", EventType::DnsName, EventModule::new("test", ModuleKind::Scan), scan.root_event())
            .unwrap(),
    );
    let child = Arc::new(
        scan.make_event("deep.other.net", EventType::DnsName, EventModule::new("test", ModuleKind::Scan), &parent)
            .unwrap(),
    );

    // the child goes first; it must not classify itself before the parent has
    scan.emit_event(child.clone(), EmitOptions::default());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!child.is_resolved());

    scan.emit_event(parent.clone(), EmitOptions::default());
    settled(&parent).await;
    settled(&child).await;
    assert_eq!(parent.scope_distance(), 1);
    assert_eq!(child.scope_distance(), 2);
    assert!(child.has_tag("internal"));
}

#[tokio::test]
async fn stop_interrupts_a_waiting_child() {
    let scan = scan_with(StaticResolver::default(), &[]);
    let parent = Arc::new(
        scan.make_event("other.net", EventType::DnsName, EventModule::new("test", ModuleKind::Scan), scan.root_event())
            .unwrap(),
    );
    let permits = Arc::new(Semaphore::new(1));
    let child = Arc::new(
        scan.make_event("deep.other.net", EventType::DnsName, EventModule::new("test", ModuleKind::Scan), &parent)
            .unwrap()
            .with_permit(permits.clone().try_acquire_owned().unwrap()),
    );
    scan.emit_event(child.clone(), EmitOptions::default());
    tokio::time::sleep(Duration::from_millis(60)).await;
    scan.stop();
    settled(&child).await;
    assert_eq!(permits.available_permits(), 1);
    assert!(scan.event_queue().is_empty());
}

#[tokio::test]
async fn speculated_host_is_emitted_for_urls() {
    let scan = scan_with(StaticResolver::default(), &[]);
    let url = Arc::new(
        scan.make_event(
            "https://portal.example.com/login",
            EventType::Url,
            EventModule::new("test", ModuleKind::Scan),
            scan.root_event(),
        )
        .unwrap()
        .with_tags([TAG_TARGET]),
    );
    scan.emit_event(url.clone(), EmitOptions::default());
    settled(&url).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while (scan.event_queue().len() < 2 || scan.stats().emitted("host", EventType::DnsName) == 0)
        && Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(scan.event_queue().len(), 2);
    assert_eq!(scan.stats().emitted("host", EventType::DnsName), 1);
}

#[tokio::test]
async fn idle_scan_needs_every_pass() {
    let scan = scan_with(StaticResolver::default(), &[]);
    let started = Instant::now();
    let status = scan.modules_status(false, None).await;
    assert!(status.finished);
    // four sleeps between five idle readings
    assert!(started.elapsed() >= Duration::from_millis(4 * 20));
    assert_eq!(status.modules.len(), 1);
    assert_eq!(status.modules_errored, 0);
}

#[tokio::test]
async fn busy_pool_is_not_finished() {
    let scan = scan_with(StaticResolver::default(), &[]);
    scan.pools()
        .dns
        .submit_task(tokio::time::sleep(Duration::from_millis(300)))
        .unwrap();
    let started = Instant::now();
    let status = scan.modules_status(false, None).await;
    assert!(!status.finished);
    assert_eq!(status.scan.queued_tasks.dns, 1);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn queued_event_is_not_finished() {
    let scan = scan_with(StaticResolver::default(), &[]);
    scan.queue_event(scan.root_event().clone());
    let status = scan.modules_status(false, Some(1)).await;
    assert!(!status.finished);
    assert_eq!(status.scan.queued_events["manager"], 1);
}
