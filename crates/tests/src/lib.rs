//! # Integration Tests
//!
//! Cross-crate and end-to-end tests.
//!
//! Covers:
//! - Configuration text to running dispatcher
//! - Delivery to a mock HTTP endpoint alongside an unreachable broker
//! - Counter consistency across the whole path

#[cfg(test)]
mod contract_tests {
    use contracts::{Destination, Priority, SecurityEvent};

    #[test]
    fn test_destination_names_are_stable() {
        let names: Vec<_> = Destination::ALL.iter().map(|d| d.as_str()).collect();
        assert_eq!(names, ["elasticsearch", "mqtt", "webhook"]);
    }

    #[test]
    fn test_test_event_snapshot() {
        let event = SecurityEvent::test_event();
        let value: serde_json::Value =
            serde_json::from_slice(&event.to_json_bytes().unwrap()).unwrap();

        assert_eq!(value["rule"], "Test rule");
        assert_eq!(value["priority"], Priority::Debug.as_str());
        assert_eq!(value["source"], "debug");
        assert_eq!(value["tags"], serde_json::json!(["test", "example"]));
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{Destination, Priority, SecurityEvent};
    use dispatcher::{Dispatcher, DispatcherBuilder, NoopBackend, Stats, StatsSnapshot};
    use mockito::{Matcher, Server};
    use tokio::sync::mpsc;

    async fn build(toml: &str, stats: Arc<Stats>) -> Dispatcher {
        let config = ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap();
        DispatcherBuilder::new(config)
            .with_stats(stats)
            .with_metrics_backend(Arc::new(NoopBackend))
            .build()
            .await
            .unwrap()
    }

    fn event(priority: Priority) -> SecurityEvent {
        let mut event = SecurityEvent::new(
            "Terminal shell in container",
            priority,
            "A shell was spawned in a container with an attached terminal",
        );
        event.hostname = Some("node-1".to_string());
        event
    }

    /// One event, two outputs: the index accepts it, the broker is down.
    /// Each outcome lands on its own destination only.
    #[tokio::test]
    async fn test_e2e_http_ok_broker_down() {
        let mut server = Server::new_async().await;
        let index = server
            .mock("POST", Matcher::Regex(r"^/falco-\d{4}\.\d{2}\.\d{2}/_doc$".to_string()))
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "rule": "Terminal shell in container",
                "priority": "Critical",
                "hostname": "node-1"
            })))
            .with_status(201)
            .create_async()
            .await;

        let toml = format!(
            r#"
[outputs.elasticsearch]
host_port = "{}"

[outputs.mqtt]
broker = "tcp://127.0.0.1:1"
topic = "falco/events"
qos = 1
"#,
            server.url()
        );
        let stats = Arc::new(Stats::new());
        let dispatcher = build(&toml, Arc::clone(&stats)).await;
        assert_eq!(
            dispatcher.destinations(),
            vec![Destination::Elasticsearch, Destination::Mqtt]
        );

        let summary = dispatcher.dispatch(event(Priority::Critical)).await;

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.ok, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(
            stats.snapshot(Destination::Elasticsearch),
            StatsSnapshot { total: 1, ok: 1, error: 0 }
        );
        assert_eq!(
            stats.snapshot(Destination::Mqtt),
            StatsSnapshot { total: 1, ok: 0, error: 1 }
        );
        index.assert_async().await;

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_e2e_minimum_priority_from_config() {
        let mut server = Server::new_async().await;
        let index = server
            .mock("POST", "/falco/_doc")
            .with_status(201)
            .expect(2)
            .create_async()
            .await;
        let hook = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let toml = format!(
            r#"
[outputs.elasticsearch]
host_port = "{url}"
suffix = "none"

[outputs.webhook]
address = "{url}/hook"
minimum_priority = "critical"
"#,
            url = server.url()
        );
        let stats = Arc::new(Stats::new());
        let dispatcher = build(&toml, Arc::clone(&stats)).await;

        let low = dispatcher.dispatch(event(Priority::Warning)).await;
        let high = dispatcher.dispatch(event(Priority::Emergency)).await;

        assert_eq!(low.skipped, 1);
        assert_eq!(high.skipped, 0);
        assert_eq!(stats.snapshot(Destination::Elasticsearch).ok, 2);
        assert_eq!(stats.snapshot(Destination::Webhook).total, 1);
        index.assert_async().await;
        hook.assert_async().await;

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_e2e_run_loop_counts_every_event() {
        let mut server = Server::new_async().await;
        let _rejecting = server
            .mock("POST", "/falco/_doc")
            .with_status(503)
            .with_body("cluster unavailable")
            .create_async()
            .await;
        let hook = server
            .mock("PUT", "/hook")
            .match_header("x-relay", "e2e")
            .with_status(204)
            .expect(20)
            .create_async()
            .await;

        let toml = format!(
            r#"
[outputs.elasticsearch]
host_port = "{url}"
suffix = "none"

[outputs.webhook]
address = "{url}/hook"
method = "PUT"

[outputs.webhook.custom_headers]
X-Relay = "e2e"
"#,
            url = server.url()
        );
        let stats = Arc::new(Stats::new());
        let dispatcher = build(&toml, Arc::clone(&stats)).await;

        let (tx, rx) = mpsc::channel(4);
        let handle = dispatcher.spawn(rx);
        for _ in 0..20 {
            tx.send(event(Priority::Error)).await.unwrap();
        }
        drop(tx);

        let final_stats = handle.await.unwrap();

        assert_eq!(
            final_stats,
            vec![
                (Destination::Elasticsearch, StatsSnapshot { total: 20, ok: 0, error: 20 }),
                (Destination::Webhook, StatsSnapshot { total: 20, ok: 20, error: 0 }),
            ]
        );
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_e2e_bad_broker_fails_at_startup() {
        // Parsing validates the broker URI, so break it afterwards
        let mut config = ConfigLoader::load_from_str(
            r#"
[outputs.mqtt]
broker = "tcp://broker.local:1883"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        if let Some(mqtt) = config.outputs.mqtt.as_mut() {
            mqtt.broker = "ws://broker.local".to_string();
        }

        let result = DispatcherBuilder::new(config)
            .with_metrics_backend(Arc::new(NoopBackend))
            .build()
            .await;

        assert!(result.is_err());
    }
}
