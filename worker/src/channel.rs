use common::{
    protocol::{read_frame, write_frame},
    Error, Frame, Message, Reply, Result,
};
use std::{io, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::debug;

/// Tiempo máximo esperando una respuesta del controller.
pub const READ_TIMEOUT: Duration = Duration::from_secs(600);

/// Canal con el controller.
///
/// - lectura con timeout: un controller mudo no cuelga al worker
/// - escritura sólo de `Message`, siempre enmarcado y en UTF-8
/// - como mucho una señal terminal por canal
pub struct Channel<R, W> {
    reader: BufReader<R>,
    writer: W,
    timeout: Duration,
    terminal_sent: bool,
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            timeout: READ_TIMEOUT,
            terminal_sent: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        if msg.is_terminal() {
            if self.terminal_sent {
                return Err(Error::Protocol(format!(
                    "ya se envió una señal terminal, se descarta {}",
                    msg.name()
                )));
            }
            self.terminal_sent = true;
        }
        debug!("-> {}", msg.name());
        write_frame(&mut self.writer, &msg.to_frame()?).await
    }

    /// Manda una petición y espera su respuesta.
    pub async fn request(&mut self, msg: Message) -> Result<Reply> {
        self.send(&msg).await?;
        let frame = self.read().await?;
        debug!("<- {} ({} bytes)", frame.name, frame.payload.len());
        Reply::from_frame(&frame, &msg)
    }

    async fn read(&mut self) -> Result<Frame> {
        match tokio::time::timeout(self.timeout, read_frame(&mut self.reader)).await {
            Err(_) => Err(Error::Timeout(self.timeout)),
            Ok(Ok(Some(frame))) => Ok(frame),
            Ok(Ok(None)) => Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "el controller cerró el canal",
            ))),
            Ok(Err(e)) => Err(e),
        }
    }
}
