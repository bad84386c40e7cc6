use std::path::PathBuf;

use common::{Error, Result};

/// Port a disco master listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8989;

/// Where the master is and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterOptions {
    /// Proxy for every request to the master.
    pub proxy: Option<String>,
    pub master_host: String,
    pub master_port: u16,
    pub disco_root: Option<PathBuf>,
}

impl MasterOptions {
    pub fn new(master_host: impl Into<String>, master_port: u16) -> Self {
        Self {
            proxy: None,
            master_host: master_host.into(),
            master_port,
            disco_root: None,
        }
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Read `DISCO_PROXY`, `DISCO_MASTER_HOST`, `DISCO_PORT` and `DISCO_ROOT`.
    ///
    /// An empty proxy means no proxy. Host and port default to
    /// `localhost:8989`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let master_port = match non_empty("DISCO_PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| Error::decode(format!("DISCO_PORT `{port}` is not a port number")))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            proxy: non_empty("DISCO_PROXY"),
            master_host: non_empty("DISCO_MASTER_HOST").unwrap_or_else(|| "localhost".to_string()),
            master_port,
            disco_root: non_empty("DISCO_ROOT").map(PathBuf::from),
        })
    }

    /// `http://<host>:<port>`
    pub fn master_url(&self) -> String {
        format!("http://{}:{}", self.master_host, self.master_port)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_environment() {
        let options = MasterOptions::from_lookup(lookup(&[
            ("DISCO_PROXY", "http://127.0.0.1:8090"),
            ("DISCO_MASTER_HOST", "master"),
            ("DISCO_PORT", "8999"),
            ("DISCO_ROOT", "/srv/disco"),
        ]))
        .unwrap();

        assert_eq!(options.proxy.as_deref(), Some("http://127.0.0.1:8090"));
        assert_eq!(options.master_url(), "http://master:8999");
        assert_eq!(options.disco_root, Some(PathBuf::from("/srv/disco")));
    }

    #[test]
    fn defaults_and_empty_proxy() {
        let options = MasterOptions::from_lookup(lookup(&[("DISCO_PROXY", "")])).unwrap();
        assert_eq!(options, MasterOptions::new("localhost", DEFAULT_PORT));
    }

    #[test]
    fn bad_port() {
        let err = MasterOptions::from_lookup(lookup(&[("DISCO_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
