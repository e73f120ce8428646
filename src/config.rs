use clap::Parser;

/// Tunables enumerated in the operator-facing configuration surface.
///
/// Every field is recognized by the env var name shown in `env = "..."`
/// below (e.g. `RATE`, `MAX_TEXT`), with a CLI flag as an override and a
/// typed default matching the documented one.
#[derive(Parser, Debug, Clone)]
#[command(name = "meshmini", author, version, about = "Mesh gateway BBS", long_about = None)]
pub struct Config {
    /// Store path.
    #[arg(long, env = "DB", default_value = "board.db")]
    pub db: String,

    /// Serial path, or `auto` to probe known candidates.
    #[arg(long, env = "DEVICE", default_value = "auto")]
    pub device: String,

    /// Display name used in the menu/health text.
    #[arg(long, env = "NAME", default_value = "MeshLink BBS")]
    pub name: String,

    /// Initial admin NodeIds, comma separated.
    #[arg(long, env = "ADMINS", default_value = "")]
    pub admins: String,

    /// Initial peer NodeIds, comma separated.
    #[arg(long, env = "PEERS", default_value = "")]
    pub peers: String,

    /// Per-sender cooldown, seconds.
    #[arg(long, env = "RATE", default_value_t = 2)]
    pub rate: u64,

    /// MTU used by the pager and menu-shrink algorithm.
    #[arg(long, env = "MAX_TEXT", default_value_t = 140)]
    pub max_text: usize,

    /// Minimum seconds between outbound sends.
    #[arg(long, env = "TX_GAP", default_value_t = 1.0)]
    pub tx_gap: f64,

    /// If true, `health` is not admin-gated.
    #[arg(long, env = "HEALTH_PUBLIC", default_value_t = false)]
    pub health_public: bool,

    /// Reply to unrecognized text; if false, stay silent.
    #[arg(long, env = "UNKNOWN_REPLY", default_value_t = true)]
    pub unknown_reply: bool,

    /// Enable peer sync.
    #[arg(long, env = "SYNC", default_value_t = true)]
    pub sync: bool,

    /// Inventory window size (number of recent post ids advertised).
    #[arg(long, env = "SYNC_INV", default_value_t = 15)]
    pub sync_inv: usize,

    /// Inventory tick period, seconds.
    #[arg(long, env = "SYNC_PERIOD", default_value_t = 300)]
    pub sync_period: u64,

    /// Max chunk bytes in a PART frame.
    #[arg(long, env = "SYNC_CHUNK", default_value_t = 160)]
    pub sync_chunk: usize,

    /// Watchdog staleness threshold, seconds.
    #[arg(long, env = "RX_STALE_SEC", default_value_t = 240)]
    pub rx_stale_sec: u64,

    /// Watchdog poll period, seconds.
    #[arg(long, env = "WATCH_TICK", default_value_t = 10)]
    pub watch_tick: u64,

    /// Time zone used to format notice timestamps.
    #[arg(long, env = "TZ", default_value = "Pacific/Auckland")]
    pub tz: String,

    /// Undelivered DM expiry, hours. 0 disables expiry.
    #[arg(long, env = "DM_TTL_HOURS", default_value_t = 72)]
    pub dm_ttl_hours: u64,
}

impl Config {
    /// Parses initial admin NodeIds from the CSV `admins` field.
    pub fn initial_admins(&self) -> Vec<String> {
        split_csv(&self.admins)
    }

    /// Parses initial peer NodeIds from the CSV `peers` field.
    pub fn initial_peers(&self) -> Vec<String> {
        split_csv(&self.peers)
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        assert_eq!(split_csv(" !aaaaaaaa, !bbbbbbbb ,,"), vec!["!aaaaaaaa", "!bbbbbbbb"]);
        assert_eq!(split_csv(""), Vec::<String>::new());
    }
}
