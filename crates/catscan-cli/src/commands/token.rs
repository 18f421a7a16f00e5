//! `catscan token`

use anyhow::{bail, Context as _, Result};
use catscan_api::{EnvToken, TokenSource};
use catscan_core::KeyringTokenSource;
use clap::Subcommand;
use serde_json::json;
use std::io::{self, BufRead};

use crate::{print_json, Context};

/// Token commands
#[derive(Subcommand)]
pub enum TokenCommands {
    /// Store the API token in the system keyring
    Set {
        /// Token value; read from stdin when omitted
        token: Option<String>,
    },
    /// Remove the stored API token
    Delete,
    /// Report where the API token would be read from
    Status,
}

pub async fn execute(action: TokenCommands, ctx: &Context) -> Result<()> {
    let keyring = KeyringTokenSource::default();

    match action {
        TokenCommands::Set { token } => {
            if !ctx.use_keyring {
                bail!("--no-keyring given; nowhere to store the token");
            }
            let raw = match token {
                Some(token) => token,
                None => {
                    let mut line = String::new();
                    io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .context("failed to read token from stdin")?;
                    line
                }
            };
            keyring.store(&raw)?;
            print_json(&json!({"stored": true}))
        }
        TokenCommands::Delete => {
            if !ctx.use_keyring {
                bail!("--no-keyring given; nothing to delete");
            }
            let deleted = keyring.delete()?;
            print_json(&json!({"deleted": deleted}))
        }
        TokenCommands::Status => {
            let source = if EnvToken::default().token().await?.is_some() {
                "environment"
            } else if ctx.use_keyring && keyring.token().await?.is_some() {
                "keyring"
            } else {
                "none"
            };
            print_json(&json!({"source": source}))
        }
    }
}
