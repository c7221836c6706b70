use std::collections::VecDeque;
use std::path::PathBuf;

use visitor_analytics::crypto::{
    public_key_to_hex, secret_key_from_hex, RequestSigningParams, SiteSigningKey,
};
use visitor_analytics::domain::{SiteId, NONCE_LEN};
use visitor_analytics::infra::{IdentityHasher, Partition, SaltStore, SiteStore};

fn print_help() {
    eprintln!(
        "\
analytics-admin

USAGE:
  analytics-admin <command> [options]

COMMANDS:
  keygen                          Generate an Ed25519 pairing key
  sign-challenge                  Sign a pairing nonce
  sign-request                    Sign a stats read and print its headers
  visitor-id                      Derive the visitor identity of an address
  site-status                     Show a site's lock state

COMMON OPTIONS:
  --data-dir <path>               (defaults to env DATA_DIR, then ./data)

sign-challenge OPTIONS:
  --secret-key <hex>              (required) 32-byte secret key
  --nonce <hex>                   (required) Nonce from /pair/init

sign-request OPTIONS:
  --secret-key <hex>              (required) 32-byte secret key
  --method <GET|POST>             (default: GET)
  --path <path?query>             (required) Path and query exactly as sent
  --body <string>                 (optional) Request body
  --timestamp <unix>              (default: now)

visitor-id OPTIONS:
  --address <ip>                  (required)

site-status OPTIONS:
  --site-id <id>                  (default: default)
"
    );
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn require(value: Option<String>, flag: &str) -> anyhow::Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("{flag} is required"))
}

fn default_data_dir() -> PathBuf {
    std::env::var("DATA_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn signing_key(raw: &str) -> anyhow::Result<SiteSigningKey> {
    let secret = secret_key_from_hex(raw).map_err(|e| anyhow::anyhow!("--secret-key: {e}"))?;
    Ok(SiteSigningKey::from_bytes(&secret))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "keygen" => {
            if let Some(other) = args.pop_front() {
                anyhow::bail!("unexpected argument: {other}");
            }
            let key = SiteSigningKey::generate();
            println!("secret_key={}", hex::encode(key.to_bytes()));
            println!("public_key={}", public_key_to_hex(&key.public_key_bytes()));
            Ok(())
        }
        "sign-challenge" => {
            let mut secret_key: Option<String> = None;
            let mut nonce: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--secret-key" => secret_key = Some(take_value(&mut args, &arg)?),
                    "--nonce" => nonce = Some(take_value(&mut args, &arg)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let key = signing_key(&require(secret_key, "--secret-key")?)?;
            let nonce = require(nonce, "--nonce")?;
            let nonce = hex::decode(nonce.trim().trim_start_matches("0x"))?;
            if nonce.len() != NONCE_LEN {
                anyhow::bail!("--nonce must be {NONCE_LEN} bytes, got {}", nonce.len());
            }

            println!("public_key={}", hex::encode(key.public_key_bytes()));
            println!("signature={}", hex::encode(key.sign(&nonce)));
            Ok(())
        }
        "sign-request" => {
            let mut secret_key: Option<String> = None;
            let mut method = "GET".to_string();
            let mut path: Option<String> = None;
            let mut body = String::new();
            let mut timestamp: Option<i64> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--secret-key" => secret_key = Some(take_value(&mut args, &arg)?),
                    "--method" => method = take_value(&mut args, &arg)?.to_ascii_uppercase(),
                    "--path" => path = Some(take_value(&mut args, &arg)?),
                    "--body" => body = take_value(&mut args, &arg)?,
                    "--timestamp" => timestamp = Some(take_value(&mut args, &arg)?.parse()?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let key = signing_key(&require(secret_key, "--secret-key")?)?;
            let path = require(path, "--path")?;
            let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
            let signature = key.sign_request(&RequestSigningParams {
                method: &method,
                path: &path,
                timestamp,
                body: body.as_bytes(),
            });

            println!("X-Signature: {}", hex::encode(signature));
            println!("X-Timestamp: {timestamp}");
            Ok(())
        }
        "visitor-id" => {
            let mut data_dir = default_data_dir();
            let mut address: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--data-dir" => data_dir = PathBuf::from(take_value(&mut args, &arg)?),
                    "--address" => address = Some(take_value(&mut args, &arg)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let address = require(address, "--address")?;
            // Never creates a salt: an identity under a fresh salt would be meaningless.
            let salt = SaltStore::new(&data_dir).load_existing()?;
            println!("{}", IdentityHasher::new(salt).identify(&address));
            Ok(())
        }
        "site-status" => {
            let mut data_dir = default_data_dir();
            let mut site_id: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--data-dir" => data_dir = PathBuf::from(take_value(&mut args, &arg)?),
                    "--site-id" => site_id = Some(take_value(&mut args, &arg)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let site_id = SiteId::parse_or_default(site_id.as_deref())?;
            let path = SiteStore::new(&data_dir).partition_path(&site_id);
            if !path.exists() {
                anyhow::bail!("no partition for site {site_id} at {}", path.display());
            }

            let partition = Partition::open_existing(site_id, &path, chrono::Utc::now()).await?;
            let site = partition.site().await?;
            let days = partition.daily_stats().await?;
            partition.close().await;

            println!("site_id={}", site.site_id);
            println!("lock_state={}", site.lock_state);
            println!("created_at={}", site.created_at.to_rfc3339());
            if let Some(locked_at) = site.locked_at {
                println!("locked_at={}", locked_at.to_rfc3339());
            }
            if let Some(key) = site.public_key {
                println!("public_key={}", hex::encode(key));
            }
            println!("days_recorded={}", days.len());
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
