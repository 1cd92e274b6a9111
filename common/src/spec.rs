use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt, path::PathBuf};

use crate::{
    error::{Error, Result},
    job::{Job, JobArgs, ModuleRef},
};

/// Binario del worker dentro del bundle cuando la especificación no trae módulo propio.
pub const DEFAULT_WORKER_BIN: &str = "worker";

/// Nombre de una función registrada en el worker (`Registry`).
/// Nunca viaja código: sólo el nombre.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FnRef(pub String);

impl FnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ficheros extra del job: lista de rutas o contenido ya en memoria (ruta → bytes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiredFiles {
    Paths(Vec<PathBuf>),
    Inline(BTreeMap<String, Vec<u8>>),
}

impl Default for RequiredFiles {
    fn default() -> Self {
        RequiredFiles::Inline(BTreeMap::new())
    }
}

/// Especificación del job: funciones map/reduce y opciones.
///
/// Todas las claves conocidas tienen default; lo que no se reconoce
/// se guarda tal cual en `extra` y el core nunca lo consulta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Specification {
    pub map: Option<FnRef>,
    pub reduce: Option<FnRef>,
    pub merge_partitions: bool,
    pub required_files: RequiredFiles,
    pub required_modules: Option<Vec<ModuleRef>>,
    pub save: bool,
    pub scheduler: Map<String, Value>,
    pub partitions: u32,
    pub profile: bool,

    /// Módulo que define la especificación (además del runtime).
    pub module: Option<ModuleRef>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Specification {
    fn default() -> Self {
        Self {
            map: None,
            reduce: None,
            merge_partitions: false,
            required_files: RequiredFiles::default(),
            required_modules: None,
            save: false,
            scheduler: Map::new(),
            partitions: 1,
            profile: false,
            module: None,
            extra: Map::new(),
        }
    }
}

impl Specification {
    /// Defaults + overrides del constructor. Cada override reemplaza sólo su clave.
    pub fn with_overrides(overrides: Map<String, Value>) -> Result<Self> {
        let mut base = match serde_json::to_value(Self::default())? {
            Value::Object(map) => map,
            other => return Err(Error::invalid("spec", format!("no es un objeto: {}", other))),
        };
        for (key, value) in overrides {
            base.insert(key, value);
        }
        Ok(serde_json::from_value(Value::Object(base))?)
    }

    pub fn with_map(mut self, name: &str) -> Self {
        self.map = Some(FnRef::new(name));
        self
    }

    pub fn with_reduce(mut self, name: &str) -> Self {
        self.reduce = Some(FnRef::new(name));
        self
    }

    /// Ruta del ejecutable del worker dentro del bundle.
    pub fn bin(&self) -> String {
        let name = self
            .module
            .as_ref()
            .map(|m| m.name.as_str())
            .unwrap_or(DEFAULT_WORKER_BIN);
        format!("lib/{}", name)
    }

    /// Valor propio de la especificación (default u override del constructor).
    /// `None` sólo si la clave no existe en absoluto.
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = match key {
            "map" => serde_json::to_value(&self.map),
            "reduce" => serde_json::to_value(&self.reduce),
            "merge_partitions" => Ok(Value::Bool(self.merge_partitions)),
            "required_files" => serde_json::to_value(&self.required_files),
            "required_modules" => serde_json::to_value(&self.required_modules),
            "save" => Ok(Value::Bool(self.save)),
            "scheduler" => Ok(Value::Object(self.scheduler.clone())),
            "partitions" => Ok(Value::from(self.partitions)),
            "profile" => Ok(Value::Bool(self.profile)),
            other => return self.extra.get(other).cloned(),
        };
        value.ok()
    }

    /// Resolución en tres capas: `args[key]` > atributo del job > valor propio.
    /// Gana la primera capa que tenga la clave, entera; nunca se mezclan.
    pub fn resolve(&self, key: &str, job: &Job, args: &JobArgs) -> Option<Value> {
        if let Some(value) = args.get(key) {
            return Some(value.clone());
        }
        if let Some(value) = job.attr(key) {
            return Some(value.clone());
        }
        self.get(key)
    }

    pub fn lookup<'a>(&'a self, job: &'a Job, args: &'a JobArgs) -> Lookup<'a> {
        Lookup {
            spec: self,
            job,
            args,
        }
    }
}

/// Atajo para resolver muchas claves contra el mismo (job, args).
#[derive(Clone, Copy)]
pub struct Lookup<'a> {
    pub spec: &'a Specification,
    pub job: &'a Job,
    pub args: &'a JobArgs,
}

impl<'a> Lookup<'a> {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.spec.resolve(key, self.job, self.args)
    }

    /// Valor de verdad de la clave, con la semántica de "vacío es falso".
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).as_ref().map(truthy).unwrap_or(false)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::invalid(key, e.to_string())),
        }
    }

    /// Función map/reduce resuelta; un valor falso cuenta como "no hay función".
    pub fn function(&self, key: &str) -> Result<Option<FnRef>> {
        match self.get(key) {
            Some(value) if truthy(&value) => match value {
                Value::String(name) => Ok(Some(FnRef(name))),
                other => Err(Error::invalid(
                    key,
                    format!("se esperaba el nombre de una función, llegó {}", other),
                )),
            },
            _ => Ok(None),
        }
    }

    /// `partitions or 1`.
    pub fn partitions(&self) -> Result<u32> {
        match self.get("partitions") {
            Some(value) if truthy(&value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    Error::invalid("partitions", format!("{} no es un entero positivo", value))
                }),
            _ => Ok(1),
        }
    }
}

/// Verdad "a la manera de un dict": null, false, 0, "" y colecciones vacías son falsos.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;

    fn job() -> Job {
        Job::named("test@1", Settings::defaults())
    }

    fn args(value: Value) -> JobArgs {
        match value {
            Value::Object(map) => map,
            _ => panic!("args debe ser un objeto"),
        }
    }

    #[test]
    fn sin_overrides_quedan_los_defaults() {
        let spec = Specification::with_overrides(Map::new()).unwrap();
        assert_eq!(spec, Specification::default());
        assert_eq!(spec.get("map"), Some(Value::Null));
        assert_eq!(spec.get("reduce"), Some(Value::Null));
        assert_eq!(spec.get("merge_partitions"), Some(json!(false)));
        assert_eq!(spec.get("required_files"), Some(json!({})));
        assert_eq!(spec.get("required_modules"), Some(Value::Null));
        assert_eq!(spec.get("save"), Some(json!(false)));
        assert_eq!(spec.get("scheduler"), Some(json!({})));
        assert_eq!(spec.get("partitions"), Some(json!(1)));
        assert_eq!(spec.get("profile"), Some(json!(false)));
    }

    #[test]
    fn un_override_solo_cambia_su_clave() {
        let spec = Specification::with_overrides(args(json!({"partitions": 4}))).unwrap();
        assert_eq!(spec.partitions, 4);
        let mut expected = Specification::default();
        expected.partitions = 4;
        assert_eq!(spec, expected);
    }

    #[test]
    fn claves_desconocidas_se_guardan_opacas() {
        let spec =
            Specification::with_overrides(args(json!({"sort": true, "ext_params": {"a": 1}})))
                .unwrap();
        assert_eq!(spec.get("sort"), Some(json!(true)));
        assert_eq!(spec.extra.len(), 2);
        assert_eq!(spec.get("no_existe"), None);
    }

    #[test]
    fn required_files_acepta_lista_o_mapa() {
        let spec =
            Specification::with_overrides(args(json!({"required_files": ["a.txt"]}))).unwrap();
        assert_eq!(
            spec.required_files,
            RequiredFiles::Paths(vec![PathBuf::from("a.txt")])
        );
        let spec =
            Specification::with_overrides(args(json!({"required_files": {"b": [104, 105]}})))
                .unwrap();
        match spec.required_files {
            RequiredFiles::Inline(files) => assert_eq!(files["b"], b"hi".to_vec()),
            other => panic!("esperaba Inline, llegó {:?}", other),
        }
    }

    #[test]
    fn resolve_respeta_la_precedencia_de_capas() {
        let spec = Specification::default().with_map("spec.map");
        let plain = job();
        let with_attr = job().with_attr("map", json!("job.map"));
        let call = args(json!({"map": "args.map"}));

        assert_eq!(spec.resolve("map", &plain, &JobArgs::new()), Some(json!("spec.map")));
        assert_eq!(spec.resolve("map", &with_attr, &JobArgs::new()), Some(json!("job.map")));
        assert_eq!(spec.resolve("map", &plain, &call), Some(json!("args.map")));
        assert_eq!(spec.resolve("map", &with_attr, &call), Some(json!("args.map")));
    }

    #[test]
    fn resolve_no_mezcla_capas_para_una_misma_clave() {
        let mut spec = Specification::default();
        spec.scheduler.insert("max_cores".into(), json!(8));
        let call = args(json!({"scheduler": {"force_local": true}}));
        let got = spec.resolve("scheduler", &job(), &call).unwrap();
        assert_eq!(got, json!({"force_local": true}));
    }

    #[test]
    fn args_con_null_tambien_ganan() {
        let spec = Specification::default().with_map("spec.map");
        let call = args(json!({"map": null}));
        let job = job();
        let lookup = spec.lookup(&job, &call);
        assert_eq!(lookup.function("map").unwrap(), None);
    }

    #[test]
    fn partitions_falso_cae_a_uno() {
        let spec = Specification::default();
        let job = job();
        let call = args(json!({"partitions": 0}));
        assert_eq!(spec.lookup(&job, &call).partitions().unwrap(), 1);
        let call = args(json!({"partitions": null}));
        assert_eq!(spec.lookup(&job, &call).partitions().unwrap(), 1);
        let call = args(json!({"partitions": -3}));
        assert!(spec.lookup(&job, &call).partitions().is_err());
    }

    #[test]
    fn truthy_sigue_la_semantica_de_vacio() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(!truthy(&json!({})));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(2)));
    }

    #[test]
    fn bin_usa_el_modulo_de_la_especificacion() {
        let mut spec = Specification::default();
        assert_eq!(spec.bin(), "lib/worker");
        spec.module = Some(ModuleRef::new("mi_worker", "target/mi_worker"));
        assert_eq!(spec.bin(), "lib/mi_worker");
    }
}
