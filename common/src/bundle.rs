use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{Read, Write},
    path::{Component, Path},
};
use tracing::debug;

use crate::{
    error::{Error, Result},
    job::ModuleRef,
};

/// Archivo del bundle: entradas por ruta dentro del archivo.
/// Si dos escrituras usan la misma ruta, gana la última.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArchive {
    entries: BTreeMap<String, Vec<u8>>,
    #[serde(skip)]
    closed: bool,
}

impl JobArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Package(format!(
                "no se puede escribir {name}: el archivo ya está cerrado"
            )));
        }
        debug!("bundle: {} ({} bytes)", name, bytes.len());
        self.entries.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    /// Escribe un fichero local con su ruta como nombre dentro del archivo.
    /// Raíz, prefijo de unidad, `.` y `..` se quitan: `/tmp/a.txt` queda como `tmp/a.txt`.
    pub fn write_path(&mut self, path: &Path) -> Result<()> {
        let name = archive_name(path)?;
        let bytes = read_for_bundle(path)?;
        self.write_bytes(&name, &bytes)
    }

    /// Escribe un fichero o un árbol entero bajo `prefix/`.
    pub fn write_tree(&mut self, path: &Path, prefix: &str) -> Result<()> {
        let meta = fs::metadata(path).map_err(|source| Error::Bundle {
            path: path.display().to_string(),
            source,
        })?;

        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = join(prefix, &base);

        if meta.is_file() {
            let bytes = read_for_bundle(path)?;
            return self.write_bytes(&name, &bytes);
        }

        let entries = fs::read_dir(path).map_err(|source| Error::Bundle {
            path: path.display().to_string(),
            source,
        })?;
        let mut children: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        children.sort();
        for child in children {
            self.write_tree(&child, &name)?;
        }
        Ok(())
    }

    /// Escribe un módulo bajo `dir/<nombre del módulo>`.
    pub fn write_module(&mut self, module: &ModuleRef, dir: &str) -> Result<()> {
        let bytes = read_for_bundle(&module.path)?;
        self.write_bytes(&join(dir, &module.name), &bytes)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes del archivo (JSON comprimido con gzip).
    pub fn dumps(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    pub fn loads(bytes: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|e| Error::Package(format!("bundle corrupto: {e}")))?;
        let mut archive: JobArchive = serde_json::from_slice(&json)?;
        archive.closed = true;
        Ok(archive)
    }

    /// Vuelca el archivo en `dir`. Rechaza rutas que se salgan del directorio.
    pub fn extract(&self, dir: &Path) -> Result<()> {
        for (name, bytes) in &self.entries {
            let relative = Path::new(name);
            let escapes = relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(Error::Package(format!("ruta fuera del bundle: {name}")));
            }

            let target = dir.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, bytes)?;

            #[cfg(unix)]
            if name.starts_with("lib/") {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
            }
        }
        Ok(())
    }
}

fn read_for_bundle(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| Error::Bundle {
        path: path.display().to_string(),
        source,
    })
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), name)
    }
}

fn archive_name(path: &Path) -> Result<String> {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return Err(Error::Package(format!(
            "{} no tiene nombre dentro del bundle",
            path.display()
        )));
    }
    Ok(parts.join("/"))
}
