//! Line-oriented JSON control front.
//!
//! One [`ControlCommand`] per input line, one [`ControlResponse`] per output
//! line. Connect, disconnect and measurement run as their own tasks so a
//! measurement on one session never holds up commands for another.

use crate::domain::models::{MeasurementOutcome, SampleBuffer, SessionId, StatusReport};
use crate::infrastructure::bluetooth::BleTransport;
use crate::session::SessionService;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Samples added to the chart per tick
pub const CHART_STEP: usize = 200;
/// Widest window shown while the chart is still scrolling
pub const CHART_WINDOW: usize = 1000;
/// Past this many samples the whole capture is shown at once
pub const CHART_CAP: usize = 6000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ControlCommand {
    NewSession,
    Connect { session: SessionId },
    Disconnect { session: SessionId },
    StartMeasurement { session: SessionId },
    Status { session: SessionId },
    Chart { session: SessionId, tick: usize },
    Quit,
}

impl ControlCommand {
    fn touches_radio(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Disconnect { .. } | Self::StartMeasurement { .. }
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ControlResponse {
    Session {
        session: SessionId,
        status: StatusReport,
    },
    Status {
        session: SessionId,
        status: StatusReport,
        message: String,
    },
    Measurement {
        session: SessionId,
        success: bool,
        samples: usize,
        message: String,
    },
    Chart {
        session: SessionId,
        start: usize,
        end: usize,
        samples: Vec<u16>,
    },
    Error(String),
    Bye,
}

/// Sample range `[start, end)` the chart shows at `tick`
pub fn chart_window(tick: usize) -> (usize, usize) {
    let end = tick.saturating_add(1).saturating_mul(CHART_STEP);
    if end > CHART_CAP {
        (0, CHART_CAP)
    } else {
        (end.saturating_sub(CHART_WINDOW), end)
    }
}

pub struct Console<T: BleTransport> {
    service: SessionService<T>,
    /// Last capture per session, kept for charting
    captures: Arc<Mutex<HashMap<SessionId, SampleBuffer>>>,
}

impl<T: BleTransport> Clone for Console<T> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            captures: self.captures.clone(),
        }
    }
}

impl<T: BleTransport> Console<T> {
    pub fn new(service: SessionService<T>) -> Self {
        Self {
            service,
            captures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn execute(&self, cmd: ControlCommand) -> ControlResponse {
        match cmd {
            ControlCommand::NewSession => {
                let session = self.service.open_session();
                ControlResponse::Session {
                    session,
                    status: self.service.status(&session),
                }
            }
            ControlCommand::Connect { session } => {
                let outcome = self.service.connect(session).await;
                ControlResponse::Status {
                    session,
                    status: self.service.status(&session),
                    message: outcome.message(&self.service.config().device_address),
                }
            }
            ControlCommand::Disconnect { session } => {
                let outcome = self.service.disconnect(session).await;
                ControlResponse::Status {
                    session,
                    status: self.service.status(&session),
                    message: outcome.message(),
                }
            }
            ControlCommand::StartMeasurement { session } => {
                let outcome = self.service.start_measurement(session).await;
                let message = outcome.message();
                let (success, samples) = match outcome {
                    MeasurementOutcome::Success(buffer) => {
                        let len = buffer.len();
                        self.captures
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(session, buffer);
                        (true, len)
                    }
                    _ => (false, 0),
                };
                ControlResponse::Measurement {
                    session,
                    success,
                    samples,
                    message,
                }
            }
            ControlCommand::Status { session } => {
                let status = self.service.status(&session);
                ControlResponse::Status {
                    session,
                    message: status.text.clone(),
                    status,
                }
            }
            ControlCommand::Chart { session, tick } => {
                let captures = self.captures.lock().unwrap_or_else(PoisonError::into_inner);
                match captures.get(&session) {
                    Some(buffer) => {
                        let (start, end) = chart_window(tick);
                        let samples = buffer.window(start, end).to_vec();
                        ControlResponse::Chart {
                            session,
                            start,
                            end: start + samples.len(),
                            samples,
                        }
                    }
                    None => ControlResponse::Error(format!(
                        "No measurement captured for session {}",
                        session
                    )),
                }
            }
            ControlCommand::Quit => ControlResponse::Bye,
        }
    }

    /// Serve commands from `reader` until EOF or `Quit`, then wait for
    /// in-flight commands to answer.
    pub async fn run<R, W>(&self, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::channel::<ControlResponse>(32);

        let read_loop = async move {
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Read error: {}", e);
                        break;
                    }
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let cmd = match serde_json::from_str::<ControlCommand>(trimmed) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        let _ = tx
                            .send(ControlResponse::Error(format!("Invalid command: {}", e)))
                            .await;
                        continue;
                    }
                };
                info!("Received command: {:?}", cmd);

                if cmd.touches_radio() {
                    let console = self.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let response = console.execute(cmd).await;
                        let _ = tx.send(response).await;
                    });
                } else {
                    let quit = cmd == ControlCommand::Quit;
                    let _ = tx.send(self.execute(cmd).await).await;
                    if quit {
                        break;
                    }
                }
            }
            debug!("Input closed");
        };

        let write_loop = async move {
            while let Some(response) = rx.recv().await {
                let json = serde_json::to_string(&response)? + "\n";
                writer.write_all(json.as_bytes()).await?;
                writer.flush().await?;
            }
            anyhow::Ok(())
        };

        let ((), written) = tokio::join!(read_loop, write_loop);
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionStatus;
    use crate::domain::settings::SessionConfig;
    use crate::infrastructure::bluetooth::mock::MockTransport;

    fn console(mock: MockTransport) -> Console<MockTransport> {
        Console::new(SessionService::new(
            Arc::new(mock),
            SessionConfig::default(),
        ))
    }

    #[test]
    fn test_chart_window_scrolls_then_caps() {
        assert_eq!(chart_window(0), (0, 200));
        assert_eq!(chart_window(4), (0, 1000));
        assert_eq!(chart_window(5), (200, 1200));
        assert_eq!(chart_window(29), (4800, 6000));
        assert_eq!(chart_window(30), (0, 6000));
        assert_eq!(chart_window(usize::MAX), (0, 6000));
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: ControlCommand = serde_json::from_str("\"NewSession\"").unwrap();
        assert_eq!(cmd, ControlCommand::NewSession);

        let id = SessionId::new();
        let text = format!("{{\"Chart\":{{\"session\":\"{}\",\"tick\":3}}}}", id);
        let cmd: ControlCommand = serde_json::from_str(&text).unwrap();
        assert_eq!(cmd, ControlCommand::Chart { session: id, tick: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_then_chart() {
        let console = console(
            MockTransport::with_target_device().emit_after_write(20, vec![0x00, 0x2a, 0x01, 0x00]),
        );

        let ControlResponse::Session { session, status } =
            console.execute(ControlCommand::NewSession).await
        else {
            panic!("expected a session");
        };
        assert_eq!(status.status, SessionStatus::NoActiveDevice);

        let response = console.execute(ControlCommand::Connect { session }).await;
        let ControlResponse::Status { status, message, .. } = response else {
            panic!("expected status");
        };
        assert_eq!(status.status, SessionStatus::Connected);
        assert!(message.starts_with("Successfully connected"));

        let response = console
            .execute(ControlCommand::StartMeasurement { session })
            .await;
        assert!(matches!(
            response,
            ControlResponse::Measurement { success: true, samples: 2, .. }
        ));

        let response = console
            .execute(ControlCommand::Chart { session, tick: 0 })
            .await;
        assert_eq!(
            response,
            ControlResponse::Chart {
                session,
                start: 0,
                end: 2,
                samples: vec![42, 256],
            }
        );
    }

    #[tokio::test]
    async fn test_chart_without_capture() {
        let console = console(MockTransport::with_target_device());
        let response = console
            .execute(ControlCommand::Chart {
                session: SessionId::new(),
                tick: 0,
            })
            .await;
        assert!(matches!(response, ControlResponse::Error(_)));
    }

    #[tokio::test]
    async fn test_run_answers_each_line() {
        let console = console(MockTransport::with_target_device());
        let input: &[u8] = b"\"NewSession\"\nnot json\n\n\"Quit\"\n\"NewSession\"\n";
        let mut output = Vec::new();

        console.run(input, &mut output).await.unwrap();

        let responses: Vec<ControlResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert!(matches!(responses[0], ControlResponse::Session { .. }));
        assert!(matches!(responses[1], ControlResponse::Error(_)));
        assert_eq!(responses[2], ControlResponse::Bye);
    }
}
