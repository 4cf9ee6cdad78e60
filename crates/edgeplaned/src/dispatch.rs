//! Event dispatch loop.
//!
//! Reads newline-delimited JSON watch events and hands them to a plugin
//! strictly one at a time. The plugin and everything under it is
//! synchronous, so each call runs on the blocking pool while holding the
//! plugin lock; the next line is not read until the call returns.

use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

use edge_core::{Plugin, WatchEvent};

/// Counts from one dispatch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events handed to the plugin.
    pub events: u64,
    /// Events whose handler returned an error.
    pub failed: u64,
    /// Lines that were not valid events.
    pub skipped: u64,
}

/// Feeds watch events to a plugin.
pub struct Dispatcher<P> {
    plugin: Arc<Mutex<P>>,
}

impl<P> Dispatcher<P>
where
    P: Plugin + Send + 'static,
{
    pub fn new(plugin: P) -> Self {
        Self {
            plugin: Arc::new(Mutex::new(plugin)),
        }
    }

    pub fn plugin(&self) -> Arc<Mutex<P>> {
        Arc::clone(&self.plugin)
    }

    /// Dispatch every event from `reader` until end of input or until
    /// `shutdown` resolves.
    ///
    /// `shutdown` is only checked between events; an event already handed
    /// to the plugin always runs to completion. Handler errors are logged
    /// and do not stop the loop.
    pub async fn run<R, S>(&self, reader: R, shutdown: S) -> anyhow::Result<DispatchStats>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        let mut stats = DispatchStats::default();
        tokio::pin!(shutdown);

        loop {
            let line = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping dispatch");
                    break;
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                debug!("end of event stream");
                break;
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event: WatchEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "skipping malformed event");
                    stats.skipped += 1;
                    continue;
                }
            };

            stats.events += 1;
            if let Err(e) = self.dispatch(event).await? {
                stats.failed += 1;
                error!(error = %e, "event handler failed");
            }
        }

        info!(
            events = stats.events,
            failed = stats.failed,
            skipped = stats.skipped,
            "dispatch finished"
        );
        Ok(stats)
    }

    /// Run one event through the plugin on the blocking pool.
    ///
    /// The outer error is fatal to the loop; the inner one is the
    /// handler's own result.
    async fn dispatch(&self, event: WatchEvent) -> anyhow::Result<Result<(), P::Error>> {
        let plugin = Arc::clone(&self.plugin);
        tokio::task::spawn_blocking(move || {
            let mut plugin = plugin
                .lock()
                .map_err(|_| anyhow!("plugin lock poisoned by an earlier panic"))?;
            debug!(kind = event.kind(), event = %event.event_type(), "dispatching event");
            Ok(apply(&mut *plugin, &event))
        })
        .await?
    }
}

fn apply<P: Plugin>(plugin: &mut P, event: &WatchEvent) -> Result<(), P::Error> {
    match event {
        WatchEvent::Endpoints { event_type, object } => plugin.handle_endpoints(*event_type, object),
        WatchEvent::Route { event_type, object } => plugin.handle_route(*event_type, object),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_core::{Endpoints, EventType, Route};

    /// Records every call; fails routes for a chosen host.
    #[derive(Default)]
    struct RecordingPlugin {
        calls: Vec<String>,
        fail_host: Option<String>,
    }

    impl Plugin for RecordingPlugin {
        type Error = std::io::Error;

        fn handle_endpoints(&mut self, event_type: EventType, endpoints: &Endpoints) -> std::io::Result<()> {
            self.calls
                .push(format!("endpoints {event_type} {}", endpoints.metadata.name));
            Ok(())
        }

        fn handle_route(&mut self, event_type: EventType, route: &Route) -> std::io::Result<()> {
            self.calls.push(format!("route {event_type} {}", route.host));
            if self.fail_host.as_deref() == Some(route.host.as_str()) {
                return Err(std::io::Error::other("reload failed"));
            }
            Ok(())
        }
    }

    const STREAM: &str = r#"{"kind":"Endpoints","type":"ADDED","object":{"metadata":{"name":"svc1"},"endpoints":["10.0.0.1:8080"]}}
{"kind":"Route","type":"ADDED","object":{"metadata":{"name":"r1"},"host":"a.example.com","serviceName":"svc1"}}

not json at all
{"kind":"Route","type":"DELETED","object":{"metadata":{"name":"r1"},"host":"a.example.com","serviceName":"svc1"}}
"#;

    fn calls(dispatcher: &Dispatcher<RecordingPlugin>) -> Vec<String> {
        dispatcher.plugin().lock().unwrap().calls.clone()
    }

    #[tokio::test]
    async fn dispatches_in_order_and_skips_malformed() {
        let dispatcher = Dispatcher::new(RecordingPlugin::default());
        let stats = dispatcher
            .run(STREAM.as_bytes(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            stats,
            DispatchStats {
                events: 3,
                failed: 0,
                skipped: 1,
            }
        );
        assert_eq!(
            calls(&dispatcher),
            vec![
                "endpoints ADDED svc1",
                "route ADDED a.example.com",
                "route DELETED a.example.com",
            ]
        );
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_the_loop() {
        let dispatcher = Dispatcher::new(RecordingPlugin {
            fail_host: Some("a.example.com".to_string()),
            ..Default::default()
        });
        let stats = dispatcher
            .run(STREAM.as_bytes(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.events, 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(calls(&dispatcher).len(), 3);
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_event() {
        let dispatcher = Dispatcher::new(RecordingPlugin::default());
        let stats = dispatcher.run(STREAM.as_bytes(), async {}).await.unwrap();

        assert_eq!(stats, DispatchStats::default());
        assert!(calls(&dispatcher).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reencrypt_route_from_wire_reaches_disk() {
        use edgeplane_state::StateStore;
        use edgeplane_template::{CertManager, ReloadScript, TemplatePlugin, TemplateRouter, TemplateSet};

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut templates = TemplateSet::new();
        templates
            .add(
                "hosts",
                "{% for id, unit in state|items %}{% for key, cfg in unit.service_alias_configs|items %}{{ key }} {{ cfg.tls_termination }}\n{% endfor %}{% endfor %}".to_string(),
                &root.join("conf/hosts.map"),
            )
            .unwrap();
        let router = TemplateRouter::from_parts(
            StateStore::open(&root.join("routes.json")).unwrap(),
            templates,
            CertManager::new(root.join("certs"), root.join("cacerts")),
            ReloadScript::new("true"),
        );
        let dispatcher = Dispatcher::new(TemplatePlugin::new(router).with_route_validation(true));

        let line = r#"{"kind":"Route","type":"ADDED","object":{"metadata":{"name":"pod","namespace":"prod"},"host":"pod.example.com","serviceName":"backend","tls":{"termination":"reencrypt","certificate":"CERT","key":"KEY","caCertificate":"CA","destinationCACertificate":"DEST"}}}"#;
        let stats = dispatcher
            .run(format!("{line}\n").as_bytes(), std::future::pending())
            .await
            .unwrap();
        assert_eq!(
            stats,
            DispatchStats {
                events: 1,
                failed: 0,
                skipped: 0,
            }
        );

        assert_eq!(
            std::fs::read_to_string(root.join("certs/pod.example.com.pem")).unwrap(),
            "KEY\nCERT\nCA"
        );
        assert_eq!(
            std::fs::read_to_string(root.join("cacerts/pod.example.com_pod.pem")).unwrap(),
            "DEST"
        );
        assert_eq!(
            std::fs::read_to_string(root.join("conf/hosts.map")).unwrap(),
            "pod.example.com- reencrypt\n"
        );

        let plugin = dispatcher.plugin();
        let guard = plugin.lock().unwrap();
        let unit = guard.router().store().find_service_unit("prod/backend").unwrap();
        assert_eq!(unit.service_alias_configs["pod.example.com-"].certificates.len(), 3);
    }

    #[tokio::test]
    async fn empty_stream() {
        let dispatcher = Dispatcher::new(RecordingPlugin::default());
        let stats = dispatcher
            .run(&b""[..], std::future::pending())
            .await
            .unwrap();
        assert_eq!(stats, DispatchStats::default());
    }
}
