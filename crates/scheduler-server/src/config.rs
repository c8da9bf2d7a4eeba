use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

fn parse_tick_interval_ms(input: &str) -> Result<Duration, String> {
    let ms: u64 = input
        .parse()
        .map_err(|_| format!("invalid tick interval (ms): {input:?}"))?;
    if ms == 0 {
        return Err("tick interval must be positive".to_string());
    }
    Ok(Duration::from_millis(ms))
}

/// Configuration for the scheduler server: a Postgres-backed workflow
/// scheduler exposing its HTTP surface over a bound address.
///
/// Every flag has an environment-variable fallback so the process can be
/// configured purely by environment in a container.
#[derive(Debug, Clone, Parser)]
#[command(name = "scheduler-server", version, about = "Multi-tenant workflow scheduler")]
pub struct Config {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum number of jobs running concurrently across the whole system.
    #[arg(long, env = "MAX_WORKERS", default_value_t = 4)]
    pub max_workers: usize,

    /// Maximum number of users holding an admission slot at once.
    #[arg(long, env = "MAX_ACTIVE_USERS", default_value_t = 4)]
    pub max_active_users: usize,

    /// Address the HTTP surface binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// How often the scheduler's control loop ticks, in milliseconds.
    #[arg(
        long = "tick-interval-ms",
        env = "TICK_INTERVAL_MS",
        default_value = "1000",
        value_parser = parse_tick_interval_ms,
    )]
    pub tick_interval: Duration,
}

impl Config {
    pub fn scheduler_config(&self) -> scheduler_engine::SchedulerConfig {
        scheduler_engine::SchedulerConfig {
            max_workers: self.max_workers,
            max_active_users: self.max_active_users,
            tick_interval: self.tick_interval,
        }
    }
}
