//! Key management tool for tokenmint deployments.
//!
//! ```text
//! tokenmint-keys generate-key       new PKCS#8 Ed25519 private key (PEM)
//! tokenmint-keys public-key <kid>   PEM public key of a configured key
//! tokenmint-keys jwks               JWK set of every configured key
//! ```
//!
//! Keys and logging are read from the environment and `.env`. Results go to
//! stdout, logs to stderr.

use std::process;
use tokenmint::keys::generate_private_key_pem;
use tokenmint::telemetry::init_tracing;
use tokenmint::{Config, TokenError};
use tracing::info;

const USAGE: &str = "usage: tokenmint-keys <generate-key | public-key <kid> | jwks>";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["generate-key"] => {
            let pem = generate_private_key_pem()?;
            print!("{}", pem.as_str());
        }
        ["public-key", kid] => {
            let config = load()?;
            let record = config.keys.resolve(kid)?;
            print!("{}", record.public_key_pem());
        }
        ["jwks"] => {
            let config = load()?;
            println!("{}", config.keys.jwks().to_json()?);
        }
        _ => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    }
    Ok(())
}

fn load() -> Result<Config, TokenError> {
    let config = Config::from_env()?;
    init_tracing(&config.tracing)?;
    info!(
        keys = config.keys.len(),
        current = ?config.keys.current_identifier(),
        "Loaded key configuration"
    );
    Ok(config)
}
