use std::{fmt, io, time::Duration};

use thiserror::Error;

use crate::task::TaskMode;

/// Clasificación de un fallo de cara al controller.
///
/// - `DataUnavailable`: la entrada no se pudo leer o está corrupta.
/// - `EnvironmentFailure`: el nodo se quedó sin recursos (fds, memoria, disco) o el canal se colgó.
/// - `Fatal`: cualquier otra cosa (error de la función de usuario, contrato roto, modo desconocido).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DataUnavailable,
    EnvironmentFailure,
    Fatal,
}

impl ErrorKind {
    /// Los dos primeros casos se pueden reintentar en otro nodo.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DataUnavailable => "data unavailable",
            ErrorKind::EnvironmentFailure => "environment failure",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("no se pudo leer la entrada {url}: {message}")]
    Data { url: String, message: String },

    #[error("error de E/S: {0}")]
    Io(#[from] io::Error),

    #[error("memoria agotada: {0}")]
    OutOfMemory(String),

    #[error("el controller no respondió en {0:?}")]
    Timeout(Duration),

    #[error("error de protocolo: {0}")]
    Protocol(String),

    #[error("error de serialización: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("paquete de job inválido: {0}")]
    Package(String),

    #[error("modo de tarea desconocido: {0:?}")]
    UnknownMode(String),

    #[error("no hay función {0} configurada")]
    MissingFunction(TaskMode),

    #[error("la función {0:?} no está registrada")]
    UnknownFunction(String),

    #[error("valor inválido para {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("falta el setting {0}")]
    MissingSetting(String),

    #[error("no se pudo empaquetar {path}: {source}")]
    Bundle {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("la tarea falló: {0}")]
    Task(String),
}

impl Error {
    pub fn data(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Data {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Data { .. } => ErrorKind::DataUnavailable,
            Error::Io(_) | Error::OutOfMemory(_) | Error::Timeout(_) => {
                ErrorKind::EnvironmentFailure
            }
            // El paquete queda incompleto: no es un problema de la entrada de datos
            Error::Bundle { .. } => ErrorKind::Fatal,
            Error::Protocol(_)
            | Error::Serde(_)
            | Error::Package(_)
            | Error::UnknownMode(_)
            | Error::MissingFunction(_)
            | Error::UnknownFunction(_)
            | Error::InvalidValue { .. }
            | Error::MissingSetting(_)
            | Error::Task(_) => ErrorKind::Fatal,
        }
    }

    /// Texto completo del error con toda la cadena de causas,
    /// que es lo que viaja en las señales terminales.
    pub fn report(&self) -> String {
        let mut out = format!("{} ({})", self, self.kind());
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\n  causado por: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
