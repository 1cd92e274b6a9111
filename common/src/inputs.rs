use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    settings::Settings,
};

pub const DIR_SCHEME: &str = "dir://";

/// Una entrada del job: una URL o una lista de réplicas redundantes de la misma entrada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputRef {
    Url(String),
    Replicas(Vec<String>),
}

impl InputRef {
    pub fn urls(&self) -> Vec<&str> {
        match self {
            InputRef::Url(url) => vec![url.as_str()],
            InputRef::Replicas(urls) => urls.iter().map(String::as_str).collect(),
        }
    }

    /// Réplica preferida (la primera).
    pub fn first(&self) -> Option<&str> {
        self.urls().into_iter().next()
    }

    pub fn is_dir(&self) -> bool {
        let urls = self.urls();
        !urls.is_empty() && urls.iter().all(|u| u.starts_with(DIR_SCHEME))
    }
}

impl From<&str> for InputRef {
    fn from(url: &str) -> Self {
        InputRef::Url(url.to_string())
    }
}

/// Qué hacer con entradas ya particionadas (`dir://`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionHint {
    /// Que decida el resolver: las entradas particionadas se expanden.
    Decide,
    /// Tratar todo como no particionado: los `dir://` quedan tal cual.
    Off,
}

/// Colaborador externo que convierte las entradas declaradas en la lista concreta.
pub trait InputResolver {
    fn input_list(&self, inputs: &[InputRef], hint: PartitionHint) -> Result<Vec<InputRef>>;

    /// `true` si todas las entradas son directorios de resultados (y hay al menos una).
    fn is_partitioned(&self, inputs: &[InputRef]) -> bool {
        !inputs.is_empty() && inputs.iter().all(InputRef::is_dir)
    }

    /// Entradas `(id de partición, url)` del índice de un `dir://`.
    fn read_index(&self, dir: &str) -> Result<Vec<(u32, String)>>;
}

/// Resolver local: `dir://host/ruta` apunta a `<DISCO_DATA>/ruta`,
/// un índice con una línea `"<id> <url>"` por partición.
#[derive(Debug, Clone)]
pub struct LocalInputs {
    data_root: PathBuf,
}

impl LocalInputs {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.data_root())
    }

    fn index_path(&self, dir: &str) -> Result<PathBuf> {
        let rest = dir
            .strip_prefix(DIR_SCHEME)
            .ok_or_else(|| Error::data(dir, "no es una URL dir://"))?;
        // dir://<host>/<ruta>: el host no importa en local
        let (_host, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::data(dir, "falta la ruta del índice"))?;
        Ok(self.data_root.join(path))
    }
}

impl InputResolver for LocalInputs {
    fn input_list(&self, inputs: &[InputRef], hint: PartitionHint) -> Result<Vec<InputRef>> {
        if hint == PartitionHint::Off || !self.is_partitioned(inputs) {
            return Ok(inputs.to_vec());
        }

        // Cada índice ordenado por id; la i-ésima entrada de cada dir forma un grupo redundante
        let mut columns: Vec<Vec<String>> = Vec::new();
        for input in inputs {
            let dir = input
                .first()
                .ok_or_else(|| Error::data("<vacío>", "entrada sin URLs"))?;
            let mut entries = self.read_index(dir)?;
            entries.sort_by_key(|(id, _)| *id);
            columns.push(entries.into_iter().map(|(_, url)| url).collect());
        }

        let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
        let grouped = (0..rows)
            .map(|i| {
                let mut group: Vec<String> = columns.iter().map(|c| c[i].clone()).collect();
                if group.len() == 1 {
                    InputRef::Url(group.remove(0))
                } else {
                    InputRef::Replicas(group)
                }
            })
            .collect();
        Ok(grouped)
    }

    fn read_index(&self, dir: &str) -> Result<Vec<(u32, String)>> {
        let path = self.index_path(dir)?;
        read_index_file(&path).map_err(|e| match e {
            Error::Io(io) => Error::data(dir, io.to_string()),
            other => other,
        })
    }
}

fn read_index_file(path: &Path) -> Result<Vec<(u32, String)>> {
    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (id, url) = line
            .split_once(' ')
            .ok_or_else(|| Error::data(path.display().to_string(), format!("línea inválida: {line}")))?;
        let id: u32 = id.parse().map_err(|_| {
            Error::data(
                path.display().to_string(),
                format!("id de partición inválido: {id}"),
            )
        })?;
        entries.push((id, url.trim().to_string()));
    }

    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    pub(crate) fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("common_inputs_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    pub(crate) fn write_index(root: &Path, name: &str, entries: &[(u32, &str)]) -> String {
        let mut f = fs::File::create(root.join(name)).unwrap();
        for (id, url) in entries {
            writeln!(f, "{} {}", id, url).unwrap();
        }
        format!("dir://localhost/{}", name)
    }

    #[test]
    fn is_partitioned_exige_todo_dir_y_no_vacio() {
        let inputs = LocalInputs::new("data");
        assert!(!inputs.is_partitioned(&[]));
        assert!(inputs.is_partitioned(&["dir://h/a".into(), "dir://h/b".into()]));
        assert!(!inputs.is_partitioned(&["dir://h/a".into(), "raw://hola".into()]));
    }

    #[test]
    fn read_index_lee_pares_id_url() {
        let tmp = temp_dir("read_index");
        let dir = write_index(&tmp, "idx", &[(0, "file:///a"), (2, "file:///c")]);
        let entries = LocalInputs::new(&tmp).read_index(&dir).unwrap();
        assert_eq!(
            entries,
            vec![(0, "file:///a".to_string()), (2, "file:///c".to_string())]
        );
    }

    #[test]
    fn read_index_inexistente_es_data_unavailable() {
        let tmp = temp_dir("missing_index");
        let err = LocalInputs::new(&tmp)
            .read_index("dir://localhost/no-existe")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataUnavailable);
    }

    #[test]
    fn input_list_off_deja_los_dir_sin_expandir() {
        let tmp = temp_dir("off");
        let dir = write_index(&tmp, "idx", &[(0, "file:///a")]);
        let inputs = vec![InputRef::Url(dir)];
        let got = LocalInputs::new(&tmp)
            .input_list(&inputs, PartitionHint::Off)
            .unwrap();
        assert_eq!(got, inputs);
    }

    #[test]
    fn input_list_decide_agrupa_por_posicion() {
        let tmp = temp_dir("decide");
        let a = write_index(&tmp, "a", &[(1, "file:///a1"), (0, "file:///a0")]);
        let b = write_index(&tmp, "b", &[(0, "file:///b0"), (1, "file:///b1")]);
        let got = LocalInputs::new(&tmp)
            .input_list(&[a.as_str().into(), b.as_str().into()], PartitionHint::Decide)
            .unwrap();
        assert_eq!(
            got,
            vec![
                InputRef::Replicas(vec!["file:///a0".into(), "file:///b0".into()]),
                InputRef::Replicas(vec!["file:///a1".into(), "file:///b1".into()]),
            ]
        );
    }

    #[test]
    fn input_list_no_particionado_pasa_tal_cual() {
        let inputs = vec![
            InputRef::from("raw://hola"),
            InputRef::Replicas(vec!["http://a/x".into(), "http://b/x".into()]),
        ];
        let got = LocalInputs::new("data")
            .input_list(&inputs, PartitionHint::Decide)
            .unwrap();
        assert_eq!(got, inputs);
    }
}
