use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::{
    bundle::JobArchive,
    error::{Error, Result},
    inputs::{InputRef, InputResolver, PartitionHint},
    job::{Job, JobArgs, ModuleRef},
    partition,
    settings::JOB_OWNER,
    spec::{RequiredFiles, Specification},
};

pub const JOBPACK_MAGIC: u16 = 0xd5c0;
pub const JOBPACK_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 128;
pub const PAYLOAD_VERSION: u32 = 1;

/// Directorio del bundle donde vive el código del worker.
pub const LIB_DIR: &str = "lib";
/// Ruta de búsqueda de módulos del worker (se le añade `lib`, nunca se reemplaza).
pub const MODULE_PATH_VAR: &str = "DISCO_MODULE_PATH";

/// Cabecera del paquete: todo lo que el controller necesita para planificar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub input: Vec<InputRef>,
    pub worker: String,
    #[serde(rename = "map?")]
    pub has_map: bool,
    #[serde(rename = "reduce?")]
    pub has_reduce: bool,
    #[serde(rename = "profile?")]
    pub profile: bool,
    pub nr_reduces: u32,
    pub prefix: String,
    pub scheduler: Map<String, Value>,
    pub owner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobEnvironment {
    pub vars: BTreeMap<String, String>,
}

/// (especificación, job, args) versionado: lo único con lo que ejecuta el worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub version: u32,
    pub spec: Specification,
    pub job: Job,
    pub args: JobArgs,
}

impl JobPayload {
    pub fn new(spec: Specification, job: Job, args: JobArgs) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            spec,
            job,
            args,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let payload: JobPayload = serde_json::from_slice(bytes)
            .map_err(|e| Error::Package(format!("payload ilegible: {e}")))?;
        if payload.version != PAYLOAD_VERSION {
            return Err(Error::Package(format!(
                "versión de payload {} no soportada (se esperaba {})",
                payload.version, PAYLOAD_VERSION
            )));
        }
        Ok(payload)
    }

    pub fn unpack(self) -> (Specification, Job, JobArgs) {
        (self.spec, self.job, self.args)
    }
}

/// Arma las cuatro piezas del paquete a partir de la especificación.
pub struct PackageAssembler<'a> {
    spec: &'a Specification,
    inputs: &'a dyn InputResolver,
    /// Código propio del runtime; va primero en el bundle.
    runtime: Vec<PathBuf>,
}

impl<'a> PackageAssembler<'a> {
    pub fn new(spec: &'a Specification, inputs: &'a dyn InputResolver) -> Self {
        Self {
            spec,
            inputs,
            runtime: Vec::new(),
        }
    }

    pub fn with_runtime(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.runtime.extend(paths);
        self
    }

    pub fn job_descriptor(&self, job: &Job, args: &JobArgs) -> Result<JobDescriptor> {
        let get = self.spec.lookup(job, args);

        let has_map = get.function("map")?.is_some();
        let has_reduce = get.function("reduce")?.is_some();

        let declared = declared_inputs(get.get("input"))?;
        let hint = if has_map {
            PartitionHint::Decide
        } else {
            PartitionHint::Off
        };
        let input = self.inputs.input_list(&declared, hint)?;

        let nr_reduces = partition::nr_reduces(
            has_map,
            &input,
            get.partitions()?,
            get.flag("merge_partitions"),
            self.inputs,
        )?;

        let scheduler = get.get_as::<Map<String, Value>>("scheduler")?.unwrap_or_default();
        let owner = job.settings.require(JOB_OWNER)?.to_string();

        debug!(
            "descriptor de {}: map={} reduce={} nr_reduces={} entradas={}",
            job.name,
            has_map,
            has_reduce,
            nr_reduces,
            input.len()
        );

        Ok(JobDescriptor {
            input,
            worker: self.spec.bin(),
            has_map,
            has_reduce,
            profile: get.flag("profile"),
            nr_reduces,
            prefix: job.name.clone(),
            scheduler,
            owner,
        })
    }

    /// Entorno del worker: settings del job + locale C + `lib` en las rutas de búsqueda.
    pub fn job_environment(&self, job: &Job, _args: &JobArgs) -> JobEnvironment {
        let mut vars = job.settings.env();
        vars.insert("LC_ALL".to_string(), "C".to_string());
        vars.insert("LD_LIBRARY_PATH".to_string(), LIB_DIR.to_string());
        let module_path = match vars.get(MODULE_PATH_VAR) {
            Some(prev) if !prev.is_empty() => format!("{}:{}", prev, LIB_DIR),
            _ => LIB_DIR.to_string(),
        };
        vars.insert(MODULE_PATH_VAR.to_string(), module_path);
        JobEnvironment { vars }
    }

    /// Bundle: runtime primero (así lo que venga después puede pisarlo),
    /// luego módulo del job, módulo de la especificación, ficheros y módulos requeridos.
    pub fn job_bundle(&self, job: &Job, args: &JobArgs) -> Result<JobArchive> {
        let get = self.spec.lookup(job, args);
        let mut zip = JobArchive::new();

        for path in &self.runtime {
            zip.write_tree(path, LIB_DIR)?;
        }
        if let Some(module) = &job.module {
            zip.write_module(module, "")?;
        }
        if let Some(module) = &self.spec.module {
            zip.write_module(module, LIB_DIR)?;
        }

        match get.get_as::<RequiredFiles>("required_files")? {
            Some(RequiredFiles::Inline(files)) => {
                for (path, bytes) in files {
                    zip.write_bytes(&path, &bytes)?;
                }
            }
            Some(RequiredFiles::Paths(paths)) => {
                for path in paths {
                    zip.write_path(&path)?;
                }
            }
            None => {}
        }

        for module in get.get_as::<Vec<ModuleRef>>("required_modules")?.unwrap_or_default() {
            zip.write_module(&module, LIB_DIR)?;
        }

        Ok(zip)
    }

    /// Bundle cerrado y serializado, listo para ir dentro del paquete.
    pub fn job_home(&self, job: &Job, args: &JobArgs) -> Result<Vec<u8>> {
        let mut zip = self.job_bundle(job, args)?;
        zip.close();
        zip.dumps()
    }

    pub fn job_payload(&self, job: &Job, args: &JobArgs) -> JobPayload {
        JobPayload::new(self.spec.clone(), job.clone(), args.clone())
    }

    /// Paquete completo. Si cualquier pieza falla no se devuelve nada.
    pub fn job_pack(&self, job: &Job, args: &JobArgs) -> Result<JobPack> {
        let descriptor = self.job_descriptor(job, args)?;
        let environment = self.job_environment(job, args);
        let bundle = self.job_home(job, args)?;
        let payload = self.job_payload(job, args);
        info!(
            "paquete de {} listo ({} bytes de bundle)",
            job.name,
            bundle.len()
        );
        Ok(JobPack {
            descriptor,
            environment,
            bundle,
            payload,
        })
    }
}

/// `input or ()`: un valor falso es "sin entradas"; un string suelto es una sola entrada.
fn declared_inputs(value: Option<Value>) -> Result<Vec<InputRef>> {
    match value {
        Some(value) if crate::spec::truthy(&value) => match value {
            Value::String(url) => Ok(vec![InputRef::Url(url)]),
            other => serde_json::from_value(other).map_err(|e| Error::invalid("input", e.to_string())),
        },
        _ => Ok(Vec::new()),
    }
}

/// Paquete binario: cabecera fija de 128 bytes + cuatro secciones.
///
/// ```text
/// 0      2        4         8          12       16         20
/// | magic | versión | off desc | off env | off bundle | off payload | relleno ... |
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct JobPack {
    pub descriptor: JobDescriptor,
    pub environment: JobEnvironment,
    pub bundle: Vec<u8>,
    pub payload: JobPayload,
}

impl JobPack {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let descriptor = serde_json::to_vec(&self.descriptor)?;
        let environment = serde_json::to_vec(&self.environment)?;
        let payload = self.payload.to_bytes()?;

        let mut offsets = [0u32; 4];
        let mut cursor = HEADER_SIZE;
        for (i, len) in [descriptor.len(), environment.len(), self.bundle.len()]
            .into_iter()
            .enumerate()
        {
            offsets[i] = offset(cursor)?;
            cursor += len;
        }
        offsets[3] = offset(cursor)?;

        let mut out = Vec::with_capacity(cursor + payload.len());
        out.extend_from_slice(&JOBPACK_MAGIC.to_be_bytes());
        out.extend_from_slice(&JOBPACK_VERSION.to_be_bytes());
        for off in offsets {
            out.extend_from_slice(&off.to_be_bytes());
        }
        out.resize(HEADER_SIZE, 0);

        out.extend_from_slice(&descriptor);
        out.extend_from_slice(&environment);
        out.extend_from_slice(&self.bundle);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Package(format!(
                "paquete demasiado corto ({} bytes)",
                bytes.len()
            )));
        }
        let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
        if magic != JOBPACK_MAGIC {
            return Err(Error::Package(format!("magic inválido: {magic:#06x}")));
        }
        let version = u16::from_be_bytes([bytes[2], bytes[3]]);
        if version != JOBPACK_VERSION {
            return Err(Error::Package(format!("versión de paquete {version} no soportada")));
        }

        let mut offsets = [0usize; 5];
        for (i, slot) in offsets.iter_mut().take(4).enumerate() {
            let at = 4 + i * 4;
            *slot = u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
                as usize;
        }
        offsets[4] = bytes.len();

        if offsets[0] < HEADER_SIZE || offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::Package(format!("offsets inválidos: {:?}", &offsets[..4])));
        }
        let section = |i: usize| &bytes[offsets[i]..offsets[i + 1]];

        Ok(JobPack {
            descriptor: section_json(section(0), "descriptor")?,
            environment: section_json(section(1), "entorno")?,
            bundle: section(2).to_vec(),
            payload: JobPayload::from_bytes(section(3))?,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.encode()?)?;
        Ok(())
    }

    pub fn archive(&self) -> Result<JobArchive> {
        JobArchive::loads(&self.bundle)
    }
}

fn offset(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::Package("paquete mayor de 4 GiB".to_string()))
}

fn section_json<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Package(format!("{what} ilegible: {e}")))
}
