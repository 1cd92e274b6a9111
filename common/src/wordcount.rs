use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    job::{Job, JobArgs},
    task::Task,
};

pub const MAP: &str = "wordcount.map";
pub const REDUCE: &str = "wordcount.reduce";
/// El reduce de wordcount sirve para cualquier salida `clave\tentero`.
pub const SUM_REDUCE: &str = "sum.reduce";

/// Limpia un token: sólo alfanumérico y '_', en minúscula.
fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

/// Cuenta palabras de un texto.
pub fn count_words(text: &str) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for line in text.lines() {
        for raw in line.split_whitespace() {
            let cleaned = normalize(raw);
            if !cleaned.is_empty() {
                *counts.entry(cleaned).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// map: lee cada entrada como texto y emite `palabra\tconteo`
/// (ya agregado por entrada, así el shuffle mueve menos datos).
pub fn map(task: &mut Task, _job: &Job, _args: &JobArgs) -> Result<()> {
    let inputs = task.inputs().to_vec();
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();

    for url in &inputs {
        let text = task.read_input(url)?;
        for (word, n) in count_words(&text) {
            *counts.entry(word).or_insert(0) += n;
        }
    }

    for (word, n) in counts {
        task.emit(&word, &n.to_string())?;
    }
    Ok(())
}

/// reduce: entradas con líneas `clave\tconteo`; suma por clave y emite ordenado.
pub fn reduce(task: &mut Task, _job: &Job, _args: &JobArgs) -> Result<()> {
    let inputs = task.inputs().to_vec();
    let mut acc: BTreeMap<String, u64> = BTreeMap::new();

    for url in &inputs {
        let text = task.read_input(url)?;
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('\t')
                .ok_or_else(|| Error::data(url.as_str(), format!("línea sin tabulador: {line}")))?;
            let n: u64 = value
                .trim()
                .parse()
                .map_err(|_| Error::data(url.as_str(), format!("conteo inválido: {value}")))?;
            *acc.entry(key.to_string()).or_insert(0) += n;
        }
    }

    for (key, n) in acc {
        task.emit(&key, &n.to_string())?;
    }
    Ok(())
}
