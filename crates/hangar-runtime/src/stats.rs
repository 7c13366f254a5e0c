use hangar_container::{ProcessIdentity, StatsSnapshot};
use serde::Deserialize;

use crate::runtime::ContainerRuntime;

/// Subset of the runtime's `stats --format {{json .}}` line we present.
/// Any other field the runtime emits is ignored.
#[derive(Debug, Deserialize)]
struct RuntimeStatsLine {
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    #[serde(rename = "MemUsage")]
    mem_usage: String,
    #[serde(rename = "NetIO")]
    net_io: String,
    #[serde(rename = "BlockIO")]
    block_io: String,
}

#[derive(Debug)]
enum Liveness {
    Running,
    NotRunning,
    QueryFailed(String),
}

fn parse_stats_line(line: &str) -> Result<StatsSnapshot, String> {
    if line.trim().is_empty() {
        return Err("runtime returned no stats".to_string());
    }
    let parsed: RuntimeStatsLine =
        serde_json::from_str(line).map_err(|e| format!("unparseable stats output: {e}"))?;
    Ok(StatsSnapshot {
        cpu_percent: parsed.cpu_perc,
        memory_usage: parsed.mem_usage,
        net_io: parsed.net_io,
        block_io: parsed.block_io,
        offline: false,
        error: None,
    })
}

/// On-demand resource sampling. Never fails: every problem degrades to an
/// offline snapshot.
#[derive(Debug, Clone)]
pub struct StatsPoller {
    runtime: ContainerRuntime,
}

impl StatsPoller {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }

    async fn liveness(&self, identity: &ProcessIdentity) -> Liveness {
        match self.runtime.is_running(identity).await {
            Ok(true) => Liveness::Running,
            Ok(false) => Liveness::NotRunning,
            Err(err) => Liveness::QueryFailed(err.to_string()),
        }
    }

    pub async fn get_stats(&self, identity: Option<&ProcessIdentity>) -> StatsSnapshot {
        let Some(identity) = identity.filter(|p| !p.is_empty()) else {
            return StatsSnapshot::offline_with_error("identity missing");
        };

        match self.liveness(identity).await {
            Liveness::Running => {}
            Liveness::NotRunning => return StatsSnapshot::offline(),
            Liveness::QueryFailed(reason) => {
                // A removed or unknown container is a normal steady state here.
                tracing::debug!(container = %identity, %reason, "liveness query failed");
                return StatsSnapshot::offline();
            }
        }

        let line = match self.runtime.stats_json(identity).await {
            Ok(line) => line,
            Err(err) => {
                tracing::debug!(container = %identity, error = %err, "stats query failed");
                return StatsSnapshot::offline_with_error(err.to_string());
            }
        };

        parse_stats_line(&line).unwrap_or_else(|reason| {
            tracing::debug!(container = %identity, %reason, "stats parse failed");
            StatsSnapshot::offline_with_error(reason)
        })
    }
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::testing::FakeRuntime;

    fn poller(fake: &FakeRuntime) -> StatsPoller {
        StatsPoller::new(ContainerRuntime::new(&fake.config()))
    }

    #[tokio::test]
    async fn empty_identity_reports_missing() {
        let fake = FakeRuntime::new();
        let p = poller(&fake);
        let snap = p.get_stats(None).await;
        assert!(snap.offline);
        assert_eq!(snap.error.as_deref(), Some("identity missing"));

        let snap = p.get_stats(Some(&ProcessIdentity("  ".to_string()))).await;
        assert_eq!(snap.error.as_deref(), Some("identity missing"));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn stopped_container_is_offline_without_error() {
        let fake = FakeRuntime::new();
        fake.set_running("abcabcabcabc", false);
        let snap = poller(&fake)
            .get_stats(Some(&ProcessIdentity("abcabcabcabc".to_string())))
            .await;
        assert_eq!(snap, StatsSnapshot::offline());
        assert!(!fake.calls().iter().any(|c| c.starts_with("stats")));
    }

    #[tokio::test]
    async fn unknown_container_is_offline_without_error() {
        let fake = FakeRuntime::new();
        let snap = poller(&fake)
            .get_stats(Some(&ProcessIdentity("nosuchthing0".to_string())))
            .await;
        assert!(snap.offline);
        assert!(snap.error.is_none());
    }

    #[tokio::test]
    async fn running_container_reports_runtime_strings() {
        let fake = FakeRuntime::new();
        fake.set_running("abcabcabcabc", true);
        let snap = poller(&fake)
            .get_stats(Some(&ProcessIdentity("abcabcabcabc".to_string())))
            .await;
        assert!(!snap.offline);
        assert_eq!(snap.cpu_percent, "3.25%");
        assert_eq!(snap.memory_usage, "64MiB / 512MiB");
        assert_eq!(snap.net_io, "4.1kB / 2kB");
        assert_eq!(snap.block_io, "1.2MB / 0B");
    }

    #[tokio::test]
    async fn unparseable_output_is_offline_with_error() {
        let fake = FakeRuntime::new();
        fake.set_running("abcabcabcabc", true);
        fake.flag("stats_output", "--- not json ---\n");
        let snap = poller(&fake)
            .get_stats(Some(&ProcessIdentity("abcabcabcabc".to_string())))
            .await;
        assert!(snap.offline);
        assert_eq!(snap.cpu_percent, "0%");
        assert!(snap.error.unwrap().contains("unparseable"));
    }
}
