use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{Error, Result},
    task::TaskDescriptor,
};

/// Tamaño máximo de un payload.
pub const MAX_FRAME: usize = 64 * 1024 * 1024;

/// Un mensaje en el cable: `NAME SIZE PAYLOAD\n`, payload en JSON compacto (UTF-8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub payload: String,
}

impl Frame {
    pub fn new(name: &str, payload: String) -> Self {
        Self {
            name: name.to_string(),
            payload,
        }
    }

    fn json<T: Serialize>(name: &str, value: &T) -> Result<Self> {
        Ok(Self::new(name, serde_json::to_string(value)?))
    }

    fn parse<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_str(&self.payload).map_err(|e| {
            Error::Protocol(format!("payload inválido en {}: {e}", self.name))
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{} {} {}\n", self.name, self.payload.len(), self.payload).into_bytes()
    }
}

/// Mensajes worker → controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Announce { pid: u32 },
    Status(String),
    DataUnavailable(String),
    TaskFailed(String),
    WorkerDone,
    RequestPackage,
    RequestTask,
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::Announce { .. } => "PID",
            Message::Status(_) => "STA",
            Message::DataUnavailable(_) => "DAT",
            Message::TaskFailed(_) => "ERR",
            Message::WorkerDone => "END",
            Message::RequestPackage => "JOB",
            Message::RequestTask => "TASK",
        }
    }

    /// Las tres señales con las que termina un worker.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Message::DataUnavailable(_) | Message::TaskFailed(_) | Message::WorkerDone
        )
    }

    pub fn to_frame(&self) -> Result<Frame> {
        let name = self.name();
        match self {
            Message::Announce { pid } => Frame::json(name, pid),
            Message::Status(text) | Message::DataUnavailable(text) | Message::TaskFailed(text) => {
                Frame::json(name, text)
            }
            Message::WorkerDone | Message::RequestPackage | Message::RequestTask => {
                Frame::json(name, &"")
            }
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let msg = match frame.name.as_str() {
            "PID" => Message::Announce { pid: frame.parse()? },
            "STA" => Message::Status(frame.parse()?),
            "DAT" => Message::DataUnavailable(frame.parse()?),
            "ERR" => Message::TaskFailed(frame.parse()?),
            "END" => Message::WorkerDone,
            "JOB" => Message::RequestPackage,
            "TASK" => Message::RequestTask,
            other => return Err(Error::Protocol(format!("mensaje desconocido: {other}"))),
        };
        Ok(msg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageLocation {
    pub path: PathBuf,
}

/// Respuestas controller → worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Package(PackageLocation),
    Task(TaskDescriptor),
}

impl Reply {
    pub fn to_frame(&self) -> Result<Frame> {
        match self {
            Reply::Package(location) => Frame::json("JOB", location),
            Reply::Task(desc) => Frame::json("TASK", desc),
        }
    }

    /// Decodifica la respuesta a `request`; cualquier otro nombre es error de protocolo.
    pub fn from_frame(frame: &Frame, request: &Message) -> Result<Self> {
        if frame.name != request.name() {
            return Err(Error::Protocol(format!(
                "se esperaba respuesta {} y llegó {}",
                request.name(),
                frame.name
            )));
        }
        match request {
            Message::RequestPackage => Ok(Reply::Package(frame.parse()?)),
            // el modo se valida después, al crear la tarea
            Message::RequestTask => Ok(Reply::Task(frame.parse()?)),
            other => Err(Error::Protocol(format!(
                "{} no es una petición",
                other.name()
            ))),
        }
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Lee un frame completo. `Ok(None)` si el otro extremo cerró limpio antes de empezar uno.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut name = Vec::new();
    if reader.read_until(b' ', &mut name).await? == 0 {
        return Ok(None);
    }
    let name = field(name, "nombre")?;

    let mut size = Vec::new();
    reader.read_until(b' ', &mut size).await?;
    let size = field(size, "tamaño")?;
    let size: usize = size
        .parse()
        .map_err(|_| Error::Protocol(format!("tamaño inválido: {size:?}")))?;
    if size > MAX_FRAME {
        return Err(Error::Protocol(format!("mensaje de {size} bytes supera el máximo")));
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    let mut newline = [0u8; 1];
    reader.read_exact(&mut newline).await?;
    if newline[0] != b'\n' {
        return Err(Error::Protocol("falta el salto de línea final".to_string()));
    }

    let payload = String::from_utf8(payload)
        .map_err(|_| Error::Protocol("payload no es UTF-8".to_string()))?;
    Ok(Some(Frame { name, payload }))
}

fn field(mut raw: Vec<u8>, what: &str) -> Result<String> {
    if raw.pop() != Some(b' ') {
        return Err(Error::Protocol(format!("{what} truncado")));
    }
    String::from_utf8(raw).map_err(|_| Error::Protocol(format!("{what} no es UTF-8")))
}
