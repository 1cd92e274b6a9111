use common::{Error, Result};
use sysinfo::{System, SystemExt};
use tracing::{debug, info, warn};

/// Interpreta el límite de memoria del worker.
///
/// - `""` o `"0"`: sin límite
/// - `"80%"`: porcentaje de `total`
/// - `"1073741824"`: bytes
pub fn parse_mem_limit(limit: &str, total: u64) -> Result<Option<u64>> {
    let limit = limit.trim();
    if limit.is_empty() {
        return Ok(None);
    }

    let bytes = match limit.strip_suffix('%') {
        Some(percent) => {
            let percent: f64 = percent
                .trim()
                .parse()
                .map_err(|_| Error::invalid("DISCO_WORKER_MAX_MEM", format!("{limit:?} no es un porcentaje")))?;
            if !(0.0..=100.0).contains(&percent) {
                return Err(Error::invalid(
                    "DISCO_WORKER_MAX_MEM",
                    format!("{percent}% fuera de rango"),
                ));
            }
            (total as f64 * percent / 100.0) as u64
        }
        None => limit
            .parse()
            .map_err(|_| Error::invalid("DISCO_WORKER_MAX_MEM", format!("{limit:?} no es un número de bytes")))?,
    };

    Ok((bytes > 0).then_some(bytes))
}

/// Aplica el límite de memoria virtual al proceso actual.
/// Si el sistema no deja aplicarlo se sigue sin límite.
pub fn set_mem_limit(limit: &str) -> Result<()> {
    let total = if limit.trim().ends_with('%') {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.total_memory()
    } else {
        0
    };

    match parse_mem_limit(limit, total)? {
        None => {
            debug!("sin límite de memoria");
            Ok(())
        }
        Some(bytes) => {
            apply_address_space_limit(bytes);
            Ok(())
        }
    }
}

#[cfg(unix)]
fn apply_address_space_limit(bytes: u64) {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit/setrlimit sólo leen y escriben el struct que les pasamos
    if unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut current) } != 0 {
        warn!(
            "no se pudo leer RLIMIT_AS: {}",
            std::io::Error::last_os_error()
        );
        return;
    }

    let wanted = bytes as libc::rlim_t;
    let soft = if current.rlim_max != libc::RLIM_INFINITY && current.rlim_max < wanted {
        current.rlim_max
    } else {
        wanted
    };
    let limit = libc::rlimit {
        rlim_cur: soft,
        rlim_max: current.rlim_max,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
        warn!(
            "no se pudo aplicar RLIMIT_AS={}: {}",
            soft,
            std::io::Error::last_os_error()
        );
        return;
    }
    info!("límite de memoria del worker: {} bytes", soft);
}

#[cfg(not(unix))]
fn apply_address_space_limit(bytes: u64) {
    warn!("límite de memoria ({} bytes) no soportado en esta plataforma", bytes);
}
