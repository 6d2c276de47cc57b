use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Deserialize;

static MANIFEST: Lazy<Manifest> = Lazy::new(|| {
    let raw = include_str!("../../../../fixtures/manifest.json");
    serde_json::from_str(raw).expect("fixtures manifest should parse")
});

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "graph-states")]
    graph_states: HashMap<String, String>,
    compositions: HashMap<String, String>,
    #[serde(rename = "run-configs")]
    run_configs: HashMap<String, String>,
}

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures")
}

fn resolve_path(rel: &str) -> PathBuf {
    fixtures_root().join(rel)
}

fn read_to_string(rel: &str) -> Result<String> {
    let path = resolve_path(rel);
    fs::read_to_string(&path)
        .with_context(|| format!("failed to read fixture at {}", path.display()))
}

fn load_json<T: DeserializeOwned>(rel: &str) -> Result<T> {
    let text = read_to_string(rel)?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse JSON fixture {rel}"))
}

fn lookup<'a>(map: &'a HashMap<String, String>, kind: &str, name: &str) -> Result<&'a str> {
    map.get(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("unknown {kind} fixture '{name}'"))
}

/// Saved user inputs (`{"functions_nodes": ...}` documents).
pub mod graph_states {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.graph_states.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        read_to_string(lookup(&MANIFEST.graph_states, "graph state", name)?)
    }

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        super::load_json(lookup(&MANIFEST.graph_states, "graph state", name)?)
    }

    pub fn path(name: &str) -> Result<PathBuf> {
        Ok(resolve_path(lookup(&MANIFEST.graph_states, "graph state", name)?))
    }
}

/// Saved graph compositions (node names and links).
pub mod compositions {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.compositions.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        read_to_string(lookup(&MANIFEST.compositions, "composition", name)?)
    }

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        super::load_json(lookup(&MANIFEST.compositions, "composition", name)?)
    }
}

/// `.fiat_run_config.json` bodies.
pub mod run_configs {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.run_configs.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        read_to_string(lookup(&MANIFEST.run_configs, "run config", name)?)
    }

    pub fn path(name: &str) -> Result<PathBuf> {
        Ok(resolve_path(lookup(&MANIFEST.run_configs, "run config", name)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_manifest_entry_is_readable_json() {
        for key in graph_states::keys() {
            let _: serde_json::Value = graph_states::load(&key).expect("graph state");
        }
        for key in compositions::keys() {
            let _: serde_json::Value = compositions::load(&key).expect("composition");
        }
        for key in run_configs::keys() {
            let text = run_configs::json(&key).expect("run config");
            let _: serde_json::Value = serde_json::from_str(&text).expect("run config json");
        }
    }

    #[test]
    fn unknown_names_are_reported() {
        let err = graph_states::json("nope").unwrap_err();
        assert!(err.to_string().contains("unknown graph state fixture 'nope'"));
    }
}
