use std::collections::BTreeMap;

use serde::Serialize;
use tributary_core::{Pinned, Record, Result, Walker};

/// The record the CLI assembles from its files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    pub server: Server,
    pub log: Log,
    pub features: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub limits: Option<BTreeMap<String, BTreeMap<String, u32>>>,
    pub version: Pinned<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub tls: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Log {
    pub level: String,
    pub json: bool,
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self {
            version: Pinned::new(env!("CARGO_PKG_VERSION").to_owned()),
            ..Self::default()
        }
    }
}

impl Record for ServiceConfig {
    fn fields<D: 'static>(walker: &mut Walker<'_, D, Self>) -> Result<()> {
        walker.leaf("name", &[("fido", "name")], |c| &mut c.name)?;
        walker.record("server", &[("fido", "server")], |c| &mut c.server)?;
        walker.record("log", &[("fido", "log")], |c| &mut c.log)?;
        walker.leaf("features", &[("fido", "features")], |c| &mut c.features)?;
        walker.leaf("labels", &[("fido", "labels")], |c| &mut c.labels)?;
        walker.leaf("limits", &[("fido", "limits")], |c| &mut c.limits)?;
        walker.leaf("version", &[("fido", "version")], |c| &mut c.version)
    }
}

impl Record for Server {
    fn fields<D: 'static>(walker: &mut Walker<'_, D, Self>) -> Result<()> {
        walker.leaf("host", &[("fido", "host")], |s| &mut s.host)?;
        walker.leaf("port", &[("fido", "port")], |s| &mut s.port)?;
        walker.leaf("timeout_ms", &[("fido", "timeout_ms")], |s| &mut s.timeout_ms)?;
        walker.leaf("tls", &[("fido", "tls")], |s| &mut s.tls)
    }
}

impl Record for Log {
    fn fields<D: 'static>(walker: &mut Walker<'_, D, Self>) -> Result<()> {
        walker.leaf("level", &[("fido", "level")], |l| &mut l.level)?;
        walker.leaf("json", &[("fido", "json")], |l| &mut l.json)
    }
}
