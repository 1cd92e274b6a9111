use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::settings::Settings;

pub type JobName = String;

/// Argumentos de la invocación (`jobargs`): pisan a todo lo demás al resolver una clave.
pub type JobArgs = Map<String, Value>;

/// Referencia a un módulo que hay que mandar en el bundle:
/// `name` es la ruta dentro del archivo, `path` el fichero local de donde sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub path: PathBuf,
}

impl ModuleRef {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Contexto del job. Lo crea quien lanza el job; el core sólo lo lee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: JobName,
    pub settings: Settings,

    /// Módulo que define el job (si lo hay), se incluye en el bundle.
    #[serde(default)]
    pub module: Option<ModuleRef>,

    /// Atributos del job que participan en la resolución de claves
    /// (por ejemplo un job que fija su propio `map` o `partitions`).
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl Job {
    /// Job nuevo con nombre `prefix@<timestamp UTC>`.
    pub fn new(prefix: &str, settings: Settings) -> Self {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        Self::named(format!("{}@{}", prefix, stamp), settings)
    }

    pub fn named(name: impl Into<String>, settings: Settings) -> Self {
        Self {
            name: name.into(),
            settings,
            module: None,
            attrs: Map::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn with_module(mut self, module: ModuleRef) -> Self {
        self.module = Some(module);
        self
    }

    /// Equivalente a "el job expone el atributo `key`".
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_arma_nombre_con_prefijo_y_timestamp() {
        let job = Job::new("wordcount", Settings::default());
        let (prefix, stamp) = job.name.split_once('@').unwrap();
        assert_eq!(prefix, "wordcount");
        assert_eq!(stamp.len(), 17);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn attr_solo_devuelve_lo_que_el_job_expone() {
        let job = Job::named("j", Settings::default()).with_attr("partitions", json!(8));
        assert_eq!(job.attr("partitions"), Some(&json!(8)));
        assert_eq!(job.attr("map"), None);
    }
}
