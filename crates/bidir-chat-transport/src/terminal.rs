//! Line-oriented terminal bridge.
//!
//! Reads lines from any async reader into the client's input channel and
//! prints client events to any async writer.

use bidir_chat_core::{ClientEvent, Input};
use bidir_chat_session::ClientIo;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};

/// Send error.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Channel closed")]
    ChannelClosed,
}

/// Terminal bridge for connecting a line reader and a writer to a client.
pub struct TerminalBridge {
    /// Sender for typed input.
    pub input_tx: mpsc::Sender<Input>,
    /// Receiver for client events.
    pub events_rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl TerminalBridge {
    /// Create a new bridge.
    ///
    /// Returns the bridge and the client side of the channels.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, ClientIo) {
        let (io, input_tx, events_rx) = ClientIo::channel(capacity);
        (
            Self {
                input_tx,
                events_rx,
            },
            io,
        )
    }

    /// Send one line of input.
    ///
    /// # Errors
    /// Returns error if the client is gone.
    pub async fn send_line(&self, line: impl Into<String>) -> Result<(), SendError> {
        self.input_tx
            .send(Input::Line(line.into()))
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Start pumping `reader` into the client and events into `writer`.
    pub fn spawn<R, W>(self, reader: R, writer: W) -> TerminalTasks
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        TerminalTasks {
            reader: tokio::spawn(read_lines(reader, self.input_tx)),
            printer: tokio::spawn(print_events(self.events_rx, writer)),
        }
    }
}

/// Background tasks of a spawned bridge.
pub struct TerminalTasks {
    reader: JoinHandle<()>,
    printer: JoinHandle<()>,
}

impl TerminalTasks {
    /// Stop reading and wait until every pending event has been printed.
    ///
    /// The printer finishes once the client has dropped its event sink.
    pub async fn finish(self) {
        self.reader.abort();
        if let Err(e) = self.printer.await {
            tracing::debug!("Printer task ended abnormally: {e}");
        }
    }
}

/// Render an event as terminal text. State changes are not shown.
#[must_use]
pub fn render(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::Prompt { text } => Some(text.clone()),
        ClientEvent::Notice { text } => Some(format!("{text}\n")),
        ClientEvent::Message { data } => Some(format!("{data}\n")),
        ClientEvent::Callback { num } => Some(format!("received callback #{num}\n")),
        ClientEvent::AuthRefused { message } | ClientEvent::Error { message } => {
            Some(format!("{message}\n"))
        }
        ClientEvent::ConnectionLost => Some("Connection lost\n".to_string()),
        ClientEvent::State { .. } => None,
    }
}

async fn read_lines<R>(reader: R, input_tx: mpsc::Sender<Input>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if input_tx.send(Input::Line(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("End of input");
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read input: {e}");
                break;
            }
        }
    }
}

async fn print_events<W>(mut events_rx: mpsc::UnboundedReceiver<ClientEvent>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events_rx.recv().await {
        let Some(text) = render(&event) else {
            continue;
        };
        let written = async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!("Failed to write output: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(
            render(&ClientEvent::Prompt {
                text: "==> ".into()
            }),
            Some("==> ".into())
        );
        assert_eq!(
            render(&ClientEvent::Callback { num: 3 }),
            Some("received callback #3\n".into())
        );
        assert_eq!(
            render(&ClientEvent::State {
                state: bidir_chat_core::SessionState::Connected
            }),
            None
        );
    }

    #[tokio::test]
    async fn test_lines_become_input() {
        let (bridge, mut io) = TerminalBridge::new(4);
        let (_out_read, out_write) = tokio::io::duplex(64);
        let tasks = bridge.spawn(&b"alice\npw\n"[..], out_write);

        assert_eq!(io.input.recv().await, Some(Input::line("alice")));
        assert_eq!(io.input.recv().await, Some(Input::line("pw")));
        assert_eq!(io.input.recv().await, None);

        drop(io);
        tasks.finish().await;
    }

    #[tokio::test]
    async fn test_events_are_printed_in_order() {
        let (bridge, io) = TerminalBridge::new(4);
        let mut out = Vec::new();
        let (mut out_read, out_write) = tokio::io::duplex(256);
        let tasks = bridge.spawn(tokio::io::empty(), out_write);

        io.events.send(ClientEvent::notice("hello")).unwrap();
        io.events
            .send(ClientEvent::Prompt {
                text: "==> ".into(),
            })
            .unwrap();
        io.events
            .send(ClientEvent::Message {
                data: "bob > hi".into(),
            })
            .unwrap();
        drop(io);
        tasks.finish().await;

        tokio_test::assert_ok!(tokio::io::AsyncReadExt::read_to_end(&mut out_read, &mut out).await);
        assert_eq!(String::from_utf8(out).unwrap(), "hello\n==> bob > hi\n");
    }

    #[tokio::test]
    async fn test_send_line_after_client_gone() {
        let (bridge, io) = TerminalBridge::new(1);
        drop(io);
        assert!(matches!(
            bridge.send_line("late").await,
            Err(SendError::ChannelClosed)
        ));
    }
}
