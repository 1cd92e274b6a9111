use chrono::{DateTime, Utc};
use common::{Result, TaskMode};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Trace que deja una tarea ejecutada con `profile` activo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTrace {
    pub mode: TaskMode,
    pub uid: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub ok: bool,
}

/// Nombre del artefacto de profiling de una tarea.
pub fn artifact_name(uid: &str) -> String {
    format!("profile-{uid}")
}

/// Instrumento por defecto: mide el tiempo de pared de `run`.
/// Devuelve el resultado de `run` sin tocar y el trace serializado.
pub fn timed(mode: TaskMode, uid: &str, run: &mut dyn FnMut() -> Result<()>) -> (Result<()>, Vec<u8>) {
    let started_at = Utc::now();
    let t0 = Instant::now();
    let result = run();
    let trace = ProfileTrace {
        mode,
        uid: uid.to_string(),
        started_at,
        elapsed_ms: t0.elapsed().as_secs_f64() * 1000.0,
        ok: result.is_ok(),
    };
    let bytes = serde_json::to_vec_pretty(&trace).unwrap_or_default();
    (result, bytes)
}
