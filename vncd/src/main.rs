//! vncd entry point.
//!
//! ```text
//! vncd                          Serve /dev/fb0 on port 5901
//! vncd --config <path>          Load a custom config TOML
//! vncd -P 5900 -s 50            Override port and scaling
//! vncd -R viewer.local[:5500]   Dial a listening viewer
//! vncd --gen-config             Write default config to stdout
//! vncd --gen-config vncd.toml   Write default config to a file
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vncd::config::VncdConfig;
use vncd::service::VncdService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vncd", about = "Remote framebuffer server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vncd.toml")]
    config: PathBuf,

    /// TCP port for RFB clients.
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Scaling percent (1-150; anything else means 100).
    #[arg(short = 's', long)]
    scale: Option<u16>,

    /// Reverse connection to a listening viewer.
    #[arg(short = 'R', long, value_name = "HOST[:PORT]")]
    reverse: Option<String>,

    /// Write the default configuration to PATH (stdout if omitted) and
    /// exit.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    gen_config: Option<Option<PathBuf>>,
}

impl Cli {
    /// Command-line values win over the file.
    fn apply(&self, config: &mut VncdConfig) {
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(scale) = self.scale {
            config.screen.scale_percent = scale;
        }
        if let Some(reverse) = &self.reverse {
            config.network.reverse = reverse.clone();
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    match &cli.gen_config {
        Some(Some(path)) => {
            VncdConfig::write_default(path)?;
            return Ok(());
        }
        Some(None) => {
            println!("{}", VncdConfig::default_toml()?);
            return Ok(());
        }
        None => {}
    }

    // Load config.
    let mut config = VncdConfig::load(&cli.config);
    cli.apply(&mut config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("vncd v{}", env!("CARGO_PKG_VERSION"));
    info!("framebuffer: {}", config.screen.fb_device);
    if !config.network.reverse.is_empty() {
        info!("reverse connection: {}", config.network.reverse);
    }

    let service = VncdService::new(config);
    service.run().await?;

    Ok(())
}
