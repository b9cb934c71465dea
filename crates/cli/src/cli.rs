//! Command-line arguments.
//!
//! Flags override the layered configuration (defaults, `WAYFARER_CONFIG_FILE`,
//! `WAYFARER_*` environment variables).

use clap::Parser;
use wayfarer_core::CrawlConfig;

#[derive(Parser, Debug)]
#[command(name = "wayfarer", version, about = "Crawl websites and print one JSON line per fetched page")]
pub struct Cli {
    /// Seed URLs; a missing scheme defaults to https
    #[arg(required = true)]
    pub seeds: Vec<String>,

    /// Maximum link depth from the seeds (0 = unlimited)
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Number of concurrent workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Maximum in-flight requests across all domains (0 = unlimited)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Fixed delay before each request, in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Upper bound of an extra random delay, in milliseconds
    #[arg(long)]
    pub random_delay_ms: Option<u64>,

    /// How many times a URL may be fetched again after the first visit
    #[arg(long)]
    pub max_revisits: Option<u64>,

    /// Only crawl hosts matching this glob (repeatable)
    #[arg(long = "allow", value_name = "GLOB")]
    pub allowed_domains: Vec<String>,

    /// Never crawl hosts matching this glob (repeatable)
    #[arg(long = "deny", value_name = "GLOB")]
    pub disallowed_domains: Vec<String>,

    /// Skip robots.txt checks
    #[arg(long)]
    pub ignore_robots_txt: bool,

    /// Fetch the seeds only, without following links
    #[arg(long)]
    pub no_follow: bool,

    /// Emit logs as JSON on stderr
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut CrawlConfig) {
        if let Some(max_depth) = self.max_depth {
            config.max_depth = max_depth;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.delay_ms = delay_ms;
        }
        if let Some(random_delay_ms) = self.random_delay_ms {
            config.random_delay_ms = random_delay_ms;
        }
        if self.max_revisits.is_some() {
            config.max_revisits = self.max_revisits;
        }
        config.allowed_domains.extend(self.allowed_domains.iter().cloned());
        config.disallowed_domains.extend(self.disallowed_domains.iter().cloned());
        config.ignore_robots_txt |= self.ignore_robots_txt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_seeds_required() {
        assert!(Cli::try_parse_from(["wayfarer"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "wayfarer",
            "example.com",
            "https://example.org/docs",
            "--max-depth",
            "2",
            "--allow",
            "*.example.com",
            "--allow",
            "example.org",
            "--max-revisits",
            "0",
            "--ignore-robots-txt",
        ])
        .unwrap();
        assert_eq!(cli.seeds, ["example.com", "https://example.org/docs"]);

        let mut config = CrawlConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.allowed_domains, ["*.example.com", "example.org"]);
        assert_eq!(config.max_revisits, Some(0));
        assert!(config.ignore_robots_txt);
        assert_eq!(config.workers, CrawlConfig::default().workers);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["wayfarer", "example.com"]).unwrap();
        let mut config = CrawlConfig { max_depth: 5, ignore_robots_txt: true, ..Default::default() };
        cli.apply(&mut config);
        assert_eq!(config.max_depth, 5);
        assert!(config.ignore_robots_txt);
        assert!(!cli.no_follow);
    }
}
