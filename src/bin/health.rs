//! pgw-health: one-shot upstream probe
//!
//! Ops aid: probe a single proxy from the command line and print the result
//! as JSON. Exit status reflects the verdict (0 = OK/DEGRADED, 1 = DOWN).
//!
//! # Usage
//!
//! ```bash
//! pgw-health http 10.0.0.2:3128
//! pgw-health socks5 10.0.0.2:1080 user pass
//! ```

use anyhow::{bail, Context, Result};

use pgw::check::check_proxy_lenient;
use pgw::model::{Proxy, ProxyKind, ProxyStatus};

fn parse_args() -> Result<Proxy> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        bail!("usage: pgw-health <http|socks5> <host:port> [username] [password]");
    }

    let kind = match args[0].as_str() {
        "http" => ProxyKind::Http,
        "socks5" => ProxyKind::Socks5,
        other => bail!("unknown proxy type: {other} (expected http|socks5)"),
    };

    let (host, port) = args[1]
        .rsplit_once(':')
        .context("expected <host:port>")?;
    let port: u16 = port.parse().context("invalid port")?;

    Ok(Proxy {
        id: String::new(),
        label: None,
        kind,
        host: host.to_string(),
        port,
        username: args.get(2).cloned(),
        password: args.get(3).cloned(),
        enabled: true,
        status: ProxyStatus::Down,
        latency_ms: None,
        exit_ip: None,
        last_checked_at: None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    pgw::init_logging();

    let proxy = parse_args()?;
    let result = check_proxy_lenient(&proxy).await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.status == ProxyStatus::Down {
        std::process::exit(1);
    }
    Ok(())
}
