use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap},
    fmt,
    fs::File,
    hash::{Hash, Hasher},
    io::Read,
    str::FromStr,
};

use crate::{
    error::{Error, Result},
    job::JobName,
};

pub type TaskUid = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Map,
    Reduce,
}

impl TaskMode {
    /// Clave de la especificación donde vive la función de este modo.
    pub fn key(self) -> &'static str {
        match self {
            TaskMode::Map => "map",
            TaskMode::Reduce => "reduce",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for TaskMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "map" => Ok(TaskMode::Map),
            "reduce" => Ok(TaskMode::Reduce),
            other => Err(Error::UnknownMode(other.to_string())),
        }
    }
}

/// Lo que manda el controller al pedir la tarea.
/// `mode` llega como texto: un modo desconocido es un error fatal, no de deserialización.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub jobname: JobName,
    pub host: String,
    pub mode: String,
    pub uid: TaskUid,
    /// Id de la tarea dentro de su etapa (en reduce, la partición que consume).
    pub id: u32,
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Particiones de salida (en map, `nr_reduces` del job).
    #[serde(default = "one")]
    pub partitions: u32,
}

fn one() -> u32 {
    1
}

impl TaskDescriptor {
    /// Descriptor nuevo con uid aleatorio, para el host local.
    pub fn new(jobname: &str, mode: TaskMode, id: u32, inputs: Vec<String>, partitions: u32) -> Self {
        let host = hostname::get()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Self {
            jobname: jobname.to_string(),
            host,
            mode: mode.key().to_string(),
            uid: format!("{}-{}-{}", mode, id, uuid::Uuid::new_v4()),
            id,
            inputs,
            partitions: partitions.max(1),
        }
    }

    pub fn mode(&self) -> Result<TaskMode> {
        self.mode.parse()
    }
}

/// Salida de una tarea, agrupada por etiqueta de partición.
pub type Outputs = BTreeMap<u32, Vec<u8>>;

/// Destino de los resultados de una tarea.
pub trait OutputSink {
    /// Entrega efímera para la siguiente etapa. Devuelve dónde quedó.
    fn send(&mut self, task: &TaskDescriptor, outputs: &Outputs) -> Result<String>;

    /// Persistencia en el store durable. Devuelve dónde quedó.
    fn save(&mut self, task: &TaskDescriptor, outputs: &Outputs) -> Result<String>;

    /// Artefacto lateral con nombre (por ejemplo un trace de profiling).
    fn put(&mut self, task: &TaskDescriptor, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Tarea en ejecución: el descriptor, la salida acumulada y el sink.
pub struct Task {
    desc: TaskDescriptor,
    mode: TaskMode,
    outputs: Outputs,
    sink: Box<dyn OutputSink>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("desc", &self.desc)
            .field("mode", &self.mode)
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl Task {
    pub fn new(desc: TaskDescriptor, sink: Box<dyn OutputSink>) -> Result<Self> {
        let mode = desc.mode()?;
        Ok(Self {
            desc,
            mode,
            outputs: Outputs::new(),
            sink,
        })
    }

    pub fn mode(&self) -> TaskMode {
        self.mode
    }

    pub fn uid(&self) -> &str {
        &self.desc.uid
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.desc
    }

    pub fn inputs(&self) -> &[String] {
        &self.desc.inputs
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// Emite un par `key\tvalue`. En map se reparte por hash de la clave;
    /// en reduce todo va a la partición de la propia tarea.
    pub fn emit(&mut self, key: &str, value: &str) -> Result<()> {
        let partition = match self.mode {
            TaskMode::Map => hash_key_to_partition(key, self.desc.partitions.max(1)),
            TaskMode::Reduce => self.desc.id,
        };
        let buf = self.outputs.entry(partition).or_default();
        reserve(buf, key.len() + value.len() + 2)?;
        buf.extend_from_slice(key.as_bytes());
        buf.push(b'\t');
        buf.extend_from_slice(value.as_bytes());
        buf.push(b'\n');
        Ok(())
    }

    /// Lee una entrada completa como texto.
    ///
    /// - `raw://<datos>`: los datos van en la propia URL
    /// - `file://<ruta>` o una ruta sin esquema: fichero local
    pub fn read_input(&self, url: &str) -> Result<String> {
        if let Some(data) = url.strip_prefix("raw://") {
            return Ok(data.to_string());
        }
        let path = match url.strip_prefix("file://") {
            Some(path) => path,
            None if !url.contains("://") => url,
            None => return Err(Error::data(url, "esquema no soportado por este worker")),
        };
        let mut file = File::open(path).map_err(|e| Error::data(url, e.to_string()))?;
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut bytes = Vec::new();
        reserve(&mut bytes, usize::try_from(len).unwrap_or(usize::MAX))?;
        file.read_to_end(&mut bytes)
            .map_err(|e| Error::data(url, e.to_string()))?;
        String::from_utf8(bytes).map_err(|_| Error::data(url, "la entrada no es UTF-8"))
    }

    pub fn send(&mut self) -> Result<String> {
        self.sink.send(&self.desc, &self.outputs)
    }

    pub fn save(&mut self) -> Result<String> {
        self.sink.save(&self.desc, &self.outputs)
    }

    pub fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.sink.put(&self.desc, name, bytes)
    }
}

/// Partición de una clave: hash estable módulo `num_partitions`.
/// Reserva sin abortar el proceso: sin memoria la tarea acaba en `OutOfMemory`.
fn reserve(buf: &mut Vec<u8>, additional: usize) -> Result<()> {
    buf.try_reserve(additional).map_err(|e| {
        Error::OutOfMemory(format!("no se pudieron reservar {additional} bytes: {e}"))
    })
}

pub fn hash_key_to_partition(key: &str, num_partitions: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % num_partitions.max(1) as u64) as u32
}
