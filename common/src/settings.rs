use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env};

use crate::error::{Error, Result};

pub const JOB_OWNER: &str = "DISCO_JOB_OWNER";
pub const WORKER_MAX_MEM: &str = "DISCO_WORKER_MAX_MEM";
pub const DATA_ROOT: &str = "DISCO_DATA";
pub const STORE_ROOT: &str = "DDFS_DATA";
pub const WORKER_LOG: &str = "DISCO_WORKER_LOG";

const DEFAULT_MAX_MEM: &str = "80%";
const DEFAULT_DATA_ROOT: &str = "data";
const DEFAULT_STORE_ROOT: &str = "ddfs";

/// Tabla de settings del job (clave → valor, todo texto).
///
/// Se arma con defaults + variables de entorno y viaja dentro del job,
/// así que el worker lee exactamente lo mismo que vio el cliente.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Sólo los defaults, sin mirar el entorno.
    pub fn defaults() -> Self {
        let mut values = BTreeMap::new();
        values.insert(JOB_OWNER.to_string(), default_owner());
        values.insert(WORKER_MAX_MEM.to_string(), DEFAULT_MAX_MEM.to_string());
        values.insert(DATA_ROOT.to_string(), DEFAULT_DATA_ROOT.to_string());
        values.insert(STORE_ROOT.to_string(), DEFAULT_STORE_ROOT.to_string());
        Self { values }
    }

    /// Defaults pisados por las variables `DISCO_*` / `DDFS_*` del proceso.
    pub fn from_env() -> Self {
        let mut settings = Self::defaults();
        for (key, value) in env::vars() {
            if key.starts_with("DISCO_") || key.starts_with("DDFS_") {
                settings.values.insert(key, value);
            }
        }
        settings
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::MissingSetting(key.to_string()))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn data_root(&self) -> &str {
        self.get(DATA_ROOT).unwrap_or(DEFAULT_DATA_ROOT)
    }

    pub fn store_root(&self) -> &str {
        self.get(STORE_ROOT).unwrap_or(DEFAULT_STORE_ROOT)
    }

    /// Vista de entorno: cada setting como variable de entorno.
    /// Devuelve una copia; los settings no se tocan.
    pub fn env(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }
}

fn default_owner() -> String {
    let user = env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| "nobody".to_string());
    let host = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    format!("{}@{}", user, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_traen_las_claves_conocidas() {
        let s = Settings::defaults();
        assert_eq!(s.get(WORKER_MAX_MEM), Some("80%"));
        assert_eq!(s.data_root(), "data");
        assert_eq!(s.store_root(), "ddfs");
        assert!(s.get(JOB_OWNER).unwrap().contains('@'));
    }

    #[test]
    fn require_falla_si_no_existe() {
        let s = Settings::default();
        assert!(matches!(s.require(JOB_OWNER), Err(Error::MissingSetting(_))));
    }

    #[test]
    fn env_es_una_copia() {
        let s = Settings::defaults().with("PATH_EXTRA", "x");
        let mut env = s.env();
        env.insert("LC_ALL".into(), "C".into());
        assert_eq!(s.get("LC_ALL"), None);
        assert_eq!(env.get("PATH_EXTRA").map(String::as_str), Some("x"));
    }

    #[test]
    fn from_env_respeta_variables_disco() {
        env::set_var("DISCO_DATA", "/tmp/disco-data-test");
        let s = Settings::from_env();
        assert_eq!(s.data_root(), "/tmp/disco-data-test");
        env::remove_var("DISCO_DATA");
    }
}
