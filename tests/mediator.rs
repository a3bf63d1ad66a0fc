use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use tos_mediator::flows::{CanaryRequest, CanaryResponse, ConnectionStatus};
use tos_mediator::{ControllerState, Manager, MediatorConfig, MemoryBus, MessageBus, Subscription};

const CONFIG: &str = r#"
    scope = "ORG/FCY/YRD"

    [runtime]
    poll_timeout_ms = 20
    lookup_interval_ms = 50

    [canary]
    interval_ms = 200
    cdc_frequency = 1
    timeout_ms = 5000
    request_channel = "probe-req"
    response_channel = "probe-resp"
    status_channel = "probe-status"

    [[cdc.tables]]
    table = "inv_wi"
    channel = "cdc.inv_wi"
    threshold_ms = 4000
"#;

/// Plays the TOS side: answers every probe and reports `cdc` as its latest CDC activity.
fn spawn_tos(bus: Arc<MemoryBus>, cdc: String, token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut requests = bus.subscribe("probe-req").await.unwrap();
        loop {
            let batch = tokio::select! {
                _ = token.cancelled() => return,
                batch = requests.poll(Duration::from_millis(50)) => batch.unwrap(),
            };
            for record in batch {
                let req: CanaryRequest = serde_json::from_str(&record.value).unwrap();
                let now = Utc::now().timestamp_millis();
                let resp = CanaryResponse {
                    request_id: req.request_id,
                    request_sent_ms: Some(req.request_sent_ms),
                    request_received_ms: Some(now),
                    response_sent_ms: Some(now),
                    latest_cdc_creations: cdc.clone(),
                };
                let body = serde_json::to_string(&resp).unwrap();
                bus.publish("probe-resp", &record.key, &body).await.unwrap();
            }
        }
    })
}

#[tokio::test]
async fn canary_confirms_cdc_seen_on_both_sides() {
    let bus = Arc::new(MemoryBus::default());
    let mut statuses = bus.subscribe("probe-status").await.unwrap();
    let mut mgr = Manager::new(MediatorConfig::from_toml_str(CONFIG).unwrap(), bus.clone());
    mgr.init();
    assert!(mgr.config_errors().is_empty());

    let cdc_ts = Utc::now().timestamp_millis();
    let token = CancellationToken::new();
    let tos = spawn_tos(bus.clone(), format!("inv_wi=42:{cdc_ts}"), token.clone());

    mgr.start().await;
    bus.publish_at("cdc.inv_wi", "42", "{}", cdc_ts);
    let cdc = mgr.cdc_controller().unwrap().controller().clone();

    let confirmed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            for record in statuses.poll(Duration::from_millis(100)).await.unwrap() {
                let status: ConnectionStatus = serde_json::from_str(&record.value).unwrap();
                assert_eq!(status.status, "OK");
                if status.cdc_ok {
                    return status;
                }
            }
        }
    })
    .await
    .expect("no probe confirmed CDC");
    assert!(!confirmed.request_id.is_empty());

    let snapshot = mgr.probe_state().snapshot();
    assert_eq!(snapshot.cdc_ok, Some(true));
    assert_eq!(snapshot.local_cdc, format!("inv_wi=42:{cdc_ts}"));
    assert!(mgr.report().contains("CDCControllers:\nCDCController cdc subscribed to 1 CDC channel(s)"));

    let canary = mgr.canary_controller().unwrap();
    mgr.stop().await;
    token.cancel();
    tos.await.unwrap();

    assert_eq!(canary.state(), ControllerState::Stopped);
    assert_eq!(cdc.state(), ControllerState::Stopped);
    assert!(canary.stats().done >= 2);
    assert_eq!(canary.stats().failed, 0);
    assert!(canary.last_sessions().len() >= 2);
}

#[tokio::test]
async fn configuration_problems_do_not_stop_the_rest() {
    let config = MediatorConfig::from_toml_str(
        r#"
        [[endpoints]]
        name = "tos"
        url = "http://127.0.0.1:9/ws"
        [endpoints.transformer]
        request_template = "<Envelope/>"

        [canary]
        state = "on"

        [[cdc.tables]]
        table = "inv_wi"
        channel = "cdc.inv_wi"
        threshold_ms = 1000
    "#,
    )
    .unwrap();
    let mut mgr = Manager::new(config, Arc::new(MemoryBus::default()));
    mgr.start().await;

    let labels: Vec<_> = mgr.config_errors().iter().map(|e| e.as_label()).collect();
    assert_eq!(labels, ["config_missing_transport"]);
    assert!(mgr.canary_controller().is_none());
    let report = mgr.report();
    assert!(report.contains("tos: tos: invalid transformer"), "{report}");
    assert!(report.contains("canary: no probe transport configured"));

    mgr.stop().await;
    assert!(mgr.cdc_controller().unwrap().controller().is_stopped());
}
