//! Host adapter enumeration for the interactive layer.
//!
//! Parses `ip -o link show` and `ip -o addr show` output into a flat adapter
//! list. Only the interactive prompts consume this; the core modules never
//! enumerate adapters themselves.

use std::collections::HashMap;

use tokio::process::Command;

use crate::error::{LocalnetError, Result};

/// A host network adapter and its assigned addresses.
#[derive(Debug, Clone)]
pub struct Adapter {
    pub name: String,
    /// CIDR-form addresses, e.g. "192.168.1.5/24".
    pub addresses: Vec<String>,
}

/// List the host's network adapters with their addresses.
pub async fn list_adapters() -> Result<Vec<Adapter>> {
    let links = ip_output(&["-o", "link", "show"]).await?;
    let addresses = ip_output(&["-o", "addr", "show"]).await?;
    Ok(merge(parse_links(&links), parse_addresses(&addresses)))
}

async fn ip_output(args: &[&str]) -> Result<String> {
    let output = Command::new("ip").args(args).output().await.map_err(|err| {
        LocalnetError::CommandUnavailable {
            command: format!("ip {}", args.join(" ")),
            message: err.to_string(),
        }
    })?;
    if !output.status.success() {
        return Err(LocalnetError::CommandFailed {
            command: format!("ip {}", args.join(" ")),
            code: output.status.code(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `ip -o link show`: one "N: name: <FLAGS> ..." record per line.
fn parse_links(output: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in output.lines() {
        let mut fields = line.split(':').map(str::trim);
        let (Some(index), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        if index.parse::<u32>().is_err() || name.is_empty() {
            continue;
        }
        // virtual pair members show up as "veth0@if5"
        let name = name.split('@').next().unwrap_or(name);
        names.push(name.to_string());
    }
    names
}

/// Parse `ip -o addr show`: "N: name family address/prefix ..." per line.
fn parse_addresses(output: &str) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_), Some(name), Some(family), Some(address)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if family != "inet" && family != "inet6" {
            continue;
        }
        map.entry(name.to_string())
            .or_default()
            .push(address.to_string());
    }
    map
}

fn merge(names: Vec<String>, mut addresses: HashMap<String, Vec<String>>) -> Vec<Adapter> {
    names
        .into_iter()
        .map(|name| {
            let addresses = addresses.remove(&name).unwrap_or_default();
            Adapter { name, addresses }
        })
        .collect()
}
