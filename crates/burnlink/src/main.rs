use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use burnlink_server::{envelope, DecryptionMode};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "burnlink", about = "Burnlink: one-time secret links", version)]
struct Cli {
    /// Burnlink server URL (default: http://localhost:8080 or $BURNLINK_SERVER)
    #[arg(long, env = "BURNLINK_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Burnlink HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, env = "BURNLINK_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind
        #[arg(long, env = "BURNLINK_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Directory for burnlink.log (default: platform data dir)
        #[arg(long, env = "BURNLINK_LOG_DIR")]
        log_dir: Option<PathBuf>,
        /// Maximum length of submitted content, in characters
        #[arg(long, env = "BURNLINK_MAX_SECRET_LENGTH", default_value = "10000")]
        max_secret_length: usize,
        /// Maximum number of unread secrets held at once
        #[arg(long, env = "BURNLINK_MAX_UNREAD", default_value = "1000")]
        max_unread: usize,
        /// How often expired secrets are swept, e.g. 60s, 5m
        #[arg(
            long,
            env = "BURNLINK_SWEEP_INTERVAL",
            default_value = "60s",
            value_parser = parse_duration
        )]
        sweep_interval: Duration,
        /// Decrypt on the server using a key sent with each secret
        #[arg(long, env = "BURNLINK_SERVER_SIDE_DECRYPT")]
        server_side_decrypt: bool,
    },
    /// Print a fresh base64 AES-256 key
    Keygen,
    /// Store a secret and print its one-time link
    Push {
        /// The secret text
        #[arg(name = "TEXT")]
        text: String,
        /// Lifetime e.g. 30m, 1h, 7d (default: 24h)
        #[arg(long, value_parser = parse_duration)]
        lifetime: Option<Duration>,
        /// Send the key to the server instead of keeping it in the link
        #[arg(long)]
        server_side_decrypt: bool,
    },
    /// Reveal a secret (this burns it)
    Get {
        /// Link printed by `push`, or a bare secret id
        #[arg(name = "LINK")]
        link: String,
        /// Base64 key, if not carried in the link
        #[arg(long)]
        key: Option<String>,
        /// 6-character verification code; uses the verify endpoint
        #[arg(long)]
        code: Option<String>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            log_dir,
            max_secret_length,
            max_unread,
            sweep_interval,
            server_side_decrypt,
        } => {
            let log_dir = burnlink_server::dirs::log_dir(log_dir.as_deref())?;
            init_tracing("info", Some(log_dir.join("burnlink.log")))?;

            let cfg = burnlink_server::ServerConfig {
                host,
                port,
                max_secret_length,
                max_unread,
                sweep_interval,
                mode: if server_side_decrypt {
                    DecryptionMode::ServerSide
                } else {
                    DecryptionMode::ClientSide
                },
                ..Default::default()
            };
            burnlink_server::run(cfg).await
        }

        Commands::Keygen => {
            println!("{}", envelope::generate_key().to_base64());
            Ok(())
        }

        Commands::Push {
            text,
            lifetime,
            server_side_decrypt,
        } => {
            init_tracing("warn", None)?;
            cmd_push(&cli.server, &text, lifetime, server_side_decrypt).await
        }

        Commands::Get { link, key, code } => {
            init_tracing("warn", None)?;
            cmd_get(&cli.server, &link, key, code.as_deref()).await
        }
    }
}

/// Log to stderr, and additionally to `file` when given.
/// The filter comes from `BURNLINK_LOG_LEVEL`, falling back to `default_level`.
fn init_tracing(default_level: &str, file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_env("BURNLINK_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file: {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_push(
    server: &str,
    text: &str,
    lifetime: Option<Duration>,
    server_side_decrypt: bool,
) -> Result<()> {
    let key = envelope::generate_key();
    let content = envelope::encrypt(text.as_bytes(), &key).to_base64();

    let mut body = serde_json::json!({
        "content": content,
        "lifetime_minutes": lifetime.map(lifetime_minutes),
    });
    if server_side_decrypt {
        body["encryption_key"] = Value::String(key.to_base64());
    }

    let client = Client::new();
    let resp = client
        .post(format!("{}/secrets", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }

    let id = json["id"].as_str().context("response has no id")?;
    let link = format!("{}/secrets/{}", server.trim_end_matches('/'), id);
    if server_side_decrypt {
        println!("{link}");
    } else {
        println!("{link}#{}", URL_SAFE_NO_PAD.encode(key.as_bytes()));
    }
    Ok(())
}

async fn cmd_get(server: &str, link: &str, key: Option<String>, code: Option<&str>) -> Result<()> {
    let target = parse_link(link)?;
    // Reject a bad key before the request burns the secret.
    let key = key
        .or(target.key)
        .map(|k| envelope::EncryptionKey::from_base64(&k))
        .transpose()
        .context("invalid encryption key")?;
    let base = target
        .base
        .unwrap_or_else(|| server.trim_end_matches('/').to_owned());

    let client = Client::new();
    let request = match code {
        Some(code) => client
            .post(format!("{base}/secrets/{}/verify", target.id))
            .json(&serde_json::json!({ "verification_code": code })),
        None => client.get(format!("{base}/secrets/{}", target.id)),
    };
    let resp = request.send().await.context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        let error = json["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("{error}");
    }

    let content = json["content"].as_str().unwrap_or("");
    match key {
        Some(key) => {
            let plaintext = envelope::decrypt_with(content, &key)
                .map_err(|_| anyhow::anyhow!("failed to decrypt"))?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
        None => println!("{content}"),
    }
    if let Some(created_at) = json["created_at"].as_str() {
        eprintln!("(created {created_at}; this link no longer works)");
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse human duration strings like "1h", "30m", "7d", "5s".
fn parse_duration(s: &str) -> Result<Duration> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.into())
}

/// Whole minutes, rounded up so short lifetimes do not collapse to the default.
fn lifetime_minutes(d: Duration) -> u64 {
    d.as_secs().div_ceil(60).max(1)
}

#[derive(Debug, PartialEq)]
struct LinkTarget {
    /// Server base URL, when the link carried one.
    base: Option<String>,
    id: String,
    /// Standard base64 key recovered from the fragment.
    key: Option<String>,
}

/// Split `<base>/secrets/<id>#<base64url key>` (or a bare id) into parts.
fn parse_link(link: &str) -> Result<LinkTarget> {
    let (rest, fragment) = match link.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (link, None),
    };

    let (base, id) = match rest.rsplit_once("/secrets/") {
        Some((base, id)) => (Some(base.to_owned()), id),
        None => (None, rest),
    };
    let id = id.trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        anyhow::bail!("cannot find a secret id in {link}");
    }

    let key = fragment
        .filter(|f| !f.is_empty())
        .map(|f| {
            URL_SAFE_NO_PAD
                .decode(f)
                .map(|raw| STANDARD.encode(raw))
                .context("link fragment is not a valid key")
        })
        .transpose()?;

    Ok(LinkTarget {
        base,
        id: id.to_owned(),
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn minutes_round_up() {
        assert_eq!(lifetime_minutes(Duration::from_secs(1)), 1);
        assert_eq!(lifetime_minutes(Duration::from_secs(60)), 1);
        assert_eq!(lifetime_minutes(Duration::from_secs(61)), 2);
        assert_eq!(lifetime_minutes(Duration::ZERO), 1);
    }

    #[test]
    fn parses_full_link() {
        let key = [5u8; 32];
        let link = format!(
            "https://burn.example/secrets/AbC-_1#{}",
            URL_SAFE_NO_PAD.encode(key)
        );
        let target = parse_link(&link).unwrap();
        assert_eq!(target.base.as_deref(), Some("https://burn.example"));
        assert_eq!(target.id, "AbC-_1");
        assert_eq!(target.key, Some(STANDARD.encode(key)));
    }

    #[test]
    fn parses_bare_id() {
        let target = parse_link("AbC-_1").unwrap();
        assert_eq!(
            target,
            LinkTarget {
                base: None,
                id: "AbC-_1".into(),
                key: None
            }
        );
    }

    #[test]
    fn rejects_links_without_id() {
        assert!(parse_link("https://burn.example/secrets/").is_err());
        assert!(parse_link("").is_err());
        assert!(parse_link("x#not*base64").is_err());
    }

    #[test]
    fn link_key_opens_envelope() {
        let key = envelope::generate_key();
        let sealed = envelope::encrypt(b"hunter2", &key).to_base64();
        let link = format!("http://h/secrets/id#{}", URL_SAFE_NO_PAD.encode(key.as_bytes()));
        let target = parse_link(&link).unwrap();
        let key = envelope::EncryptionKey::from_base64(&target.key.unwrap()).unwrap();
        let opened = envelope::decrypt_with(&sealed, &key).unwrap();
        assert_eq!(opened.as_slice(), b"hunter2");
    }
}
