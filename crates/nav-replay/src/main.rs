//! nav-replay - feeds a recorded browsing trace through the prefetch engine
//! and prints the resulting metrics as JSON.
//!
//! ```text
//! nav-replay <trace.jsonl> [--config engine.json] [--live https://site/] [--latency 120]
//! ```

mod live;
mod sim;
mod trace;

use anyhow::{Context, Result, bail};
use nav_prefetch::prelude::*;
use nav_prefetch::{Metrics, NavigationOutcome};
use serde::Serialize;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use trace::TraceEvent;
use tracing_subscriber::EnvFilter;

struct Args {
    trace: PathBuf,
    config: Option<PathBuf>,
    live: Option<String>,
    latency_ms: u64,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut trace = None;
        let mut config = None;
        let mut live = None;
        let mut latency_ms = 120;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
                "--live" => live = Some(args.next().context("--live needs a site origin")?),
                "--latency" => {
                    latency_ms = args
                        .next()
                        .context("--latency needs milliseconds")?
                        .parse()
                        .context("--latency must be a number")?
                }
                flag if flag.starts_with("--") => bail!("unknown option {flag}"),
                path => trace = Some(PathBuf::from(path)),
            }
        }

        Ok(Self {
            trace: trace.context("usage: nav-replay <trace.jsonl> [--config file] [--live origin] [--latency ms]")?,
            config,
            live,
            latency_ms,
        })
    }
}

/// How `wait` events pass time
enum Pace {
    Manual(ManualClock),
    Real,
}

impl Pace {
    /// Let `ms` pass; background prefetches keep running meanwhile
    async fn wait(&self, ms: u64, background: &Background) {
        match self {
            Pace::Manual(clock) => clock.advance(ms),
            Pace::Real => {
                background.drive(smol::Timer::after(Duration::from_millis(ms))).await;
            }
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    events: usize,
    navigations: usize,
    instant: usize,
    streamed: usize,
    full_reloads: usize,
    prefetch_requests: usize,
    final_min_confidence: f64,
    metrics: Metrics,
}

async fn replay<F: Fetcher + 'static>(
    engine: &mut PrefetchEngine<F>,
    events: Vec<TraceEvent>,
    pace: &Pace,
) -> Summary {
    let mut summary = Summary {
        events: events.len(),
        ..Default::default()
    };

    for event in events {
        let outcomes = match event {
            TraceEvent::Navigate { url, metadata } => {
                let report = engine.navigate(&url, &metadata).await;
                summary.navigations += 1;
                match report.outcome {
                    NavigationOutcome::Instant => summary.instant += 1,
                    NavigationOutcome::Streamed => summary.streamed += 1,
                    NavigationOutcome::FullReload => summary.full_reloads += 1,
                }
                tracing::info!(url = %report.url, outcome = ?report.outcome, elapsed_ms = report.elapsed_ms, "navigated");
                Vec::new()
            }
            TraceEvent::Search { query, results_count, filters } => {
                engine.track_search(&query, results_count, filters);
                Vec::new()
            }
            TraceEvent::Interaction { target_id, kind, data } => {
                engine.track_interaction(&target_id, &data, kind);
                Vec::new()
            }
            TraceEvent::Signal { signal } => engine.on_signal(&signal),
            TraceEvent::Wait { ms } => {
                pace.wait(ms, engine.background()).await;
                engine.tick()
            }
            TraceEvent::Idle => engine.run_idle_cycle(),
            TraceEvent::Maintain => {
                engine.maintain();
                Vec::new()
            }
            TraceEvent::EndSession => {
                engine.end_session();
                Vec::new()
            }
        };
        summary.prefetch_requests += outcomes.iter().filter(|o| o.is_started()).count();
        engine.poll_background();
    }

    engine.run_until_idle().await;
    engine.maintain();
    summary.final_min_confidence = engine.min_confidence();
    summary.metrics = engine.metrics();
    summary
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let events = trace::load_trace(&args.trace)?;
    tracing::info!(events = events.len(), trace = %args.trace.display(), "replaying trace");

    let summary = match &args.live {
        Some(origin) => {
            config = config.with_site_origin(origin);
            let fetcher = live::LiveFetcher::new(
                "nav-replay/0.1",
                Duration::from_millis(config.executor.navigation_timeout_ms),
            )?;
            let mut engine = PrefetchEngine::new(
                config,
                Rc::new(SystemClock::new()),
                fetcher,
                Rc::new(sim::LoggingNavigator::new(origin)),
            )?;
            smol::block_on(replay(&mut engine, events, &Pace::Real))
        }
        None => {
            let clock = ManualClock::new(0);
            let fetcher = sim::SimulatedFetcher::new(clock.clone(), args.latency_ms);
            let mut engine = PrefetchEngine::new(
                config,
                Rc::new(clock.clone()),
                fetcher,
                Rc::new(sim::LoggingNavigator::new("/")),
            )?;
            let summary = smol::block_on(replay(&mut engine, events, &Pace::Manual(clock)));
            let fetcher = engine.executor().fetcher();
            tracing::info!(
                requests = fetcher.requests.get(),
                hints = fetcher.hints.get(),
                "simulated network totals"
            );
            summary
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        Args::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_args() {
        let parsed = args(&["t.jsonl", "--config", "c.json", "--latency", "40"]).unwrap();
        assert_eq!(parsed.trace, PathBuf::from("t.jsonl"));
        assert_eq!(parsed.config, Some(PathBuf::from("c.json")));
        assert_eq!(parsed.latency_ms, 40);
        assert!(parsed.live.is_none());

        assert!(args(&[]).is_err());
        assert!(args(&["t.jsonl", "--bogus"]).is_err());
    }

    #[test]
    fn test_simulated_replay() {
        let text = r#"
{"event":"navigate","url":"/"}
{"event":"signal","signal":{"type":"mouse_over","url":"/business/5"}}
{"event":"wait","ms":100}
{"event":"navigate","url":"/business/5"}
{"event":"signal","signal":{"type":"mouse_over","url":"/business/6"}}
{"event":"signal","signal":{"type":"mouse_out","url":"/business/6"}}
{"event":"wait","ms":100}
{"event":"navigate","url":"/business/6"}
"#;
        let events = trace::parse_trace(text).unwrap();
        let clock = ManualClock::new(0);
        let mut engine = PrefetchEngine::new(
            EngineConfig::default(),
            Rc::new(clock.clone()),
            sim::SimulatedFetcher::new(clock.clone(), 50),
            Rc::new(sim::LoggingNavigator::new("/")),
        )
        .unwrap();

        let summary = smol::block_on(replay(&mut engine, events, &Pace::Manual(clock)));
        assert_eq!(summary.navigations, 3);
        assert_eq!(summary.instant, 1);
        assert_eq!(summary.streamed, 2);
        assert_eq!(summary.metrics.cache_hits, 1);
        assert_eq!(summary.prefetch_requests, 1);
    }

    #[test]
    fn test_slow_network_prefetch_times_out() {
        let text = r#"
{"event":"navigate","url":"/"}
{"event":"signal","signal":{"type":"mouse_down","url":"/business/5"}}
{"event":"wait","ms":10}
"#;
        let events = trace::parse_trace(text).unwrap();
        let clock = ManualClock::new(0);
        let mut engine = PrefetchEngine::new(
            EngineConfig::default().with_fetch_timeout(50),
            Rc::new(clock.clone()),
            sim::SimulatedFetcher::new(clock.clone(), 100),
            Rc::new(sim::LoggingNavigator::new("/")),
        )
        .unwrap();

        let summary = smol::block_on(replay(&mut engine, events, &Pace::Manual(clock)));
        assert_eq!(summary.prefetch_requests, 1);
        assert_eq!(summary.metrics.failed_prefetches, 1);
        assert_eq!(summary.metrics.successful_prefetches, 0);
        assert!(!engine.executor().is_cached("/business/5"));
        assert!(engine.should_prefetch("/business/5"));
    }
}
