#![warn(clippy::pedantic)]

//! Socket layer of the server: a PUB socket streaming beam frames to the
//! plotting front-ends and a REP socket answering operator commands. This is
//! the boundary where the control system and the GUIs attach; everything
//! crossing it is already-resolved numbers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::str;

use bytes::Bytes;
use chrono::Local;
use futures::future::FutureExt;
use gethostname::gethostname;
use zeromq::prelude::*;

use crate::straight::{Frame, Snapshot, Straight};

// multipart layout of one published data frame
const FRAME_PARTS: usize = 13;

pub struct ChicComms {
    hostname: String,
    data_sock: zeromq::PubSocket,
    data_port: u16,
    command_sock: zeromq::RepSocket,
    command_port: u16,
    publish_frequency_exponent: u8,
    outgoing_bytes: Vec<Bytes>,
}

impl ChicComms {
    #[must_use]
    pub fn new() -> Option<Self> {
        let hostname = gethostname().into_string().ok()?;
        Some(ChicComms {
            hostname,
            data_sock: zeromq::PubSocket::new(),
            data_port: 8090,
            command_sock: zeromq::RepSocket::new(),
            command_port: 8091,
            publish_frequency_exponent: 0,
            outgoing_bytes: Vec::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn data_port(&self) -> u16 {
        self.data_port
    }

    #[inline]
    #[must_use]
    pub fn command_port(&self) -> u16 {
        self.command_port
    }

    pub fn set_publish_frequency(&mut self, num_cycles: u32) {
        // round down to the nearest power of two
        self.publish_frequency_exponent = num_cycles.checked_ilog2().unwrap_or(0) as u8;
    }

    #[inline]
    #[must_use]
    pub fn should_publish(&self, cycle: u64) -> bool {
        (cycle & ((1 << self.publish_frequency_exponent) - 1)) == 0
    }

    /// # Errors
    /// In case of any zmq error, aborts early and returns the error.
    pub async fn bind_sockets(
        &mut self,
        data_port: u16,
        command_port: u16,
    ) -> zeromq::ZmqResult<()> {
        self.data_sock
            .bind(format!("tcp://0.0.0.0:{data_port}").as_str())
            .await?;
        self.data_port = data_port;
        self.command_sock
            .bind(format!("tcp://0.0.0.0:{command_port}").as_str())
            .await?;
        self.command_port = command_port;
        Ok(())
    }

    /// # Errors
    /// In case of any zmq error, aborts early and returns the error.
    pub async fn unbind_sockets(&mut self) -> zeromq::ZmqResult<()> {
        let _ = self.data_sock.unbind_all().await;
        let _ = self.command_sock.unbind_all().await;
        Ok(())
    }

    /// Poll the command socket without blocking, handle at most one pending
    /// command and answer it. Returns the handled command text, or None when
    /// nothing was waiting. A poisoned socket is rebound rather than left
    /// dead.
    pub async fn handle_socket_request(
        &mut self,
        straight: &mut Straight,
        snapshot_path: &Path,
    ) -> Option<String> {
        let polled = catch_unwind(AssertUnwindSafe(|| self.command_sock.recv().now_or_never()));
        let cmd_msg = match polled {
            Ok(pending) => pending?.ok()?,
            Err(_) => {
                let _ = self.unbind_sockets().await;
                let _ = self.bind_sockets(self.data_port, self.command_port).await;
                return None;
            }
        };
        let cmd = str::from_utf8(cmd_msg.get(0)?).ok()?;
        let result = if let Some(rest) = cmd.strip_prefix("SNAPSHOT:") {
            process_snapshot_command(rest, straight, snapshot_path)
        } else {
            straight.process_command(cmd.split(':'))
        };
        let _ = if let Ok(response) = result {
            self.command_sock.send(response.into()).await
        } else {
            eprintln!("[{}] failed to process command [{}]", Local::now(), cmd);
            self.command_sock
                .send(format!("Command '{cmd}' not recognized").into())
                .await
        };
        Some(cmd.to_string())
    }

    /// Publish one multipart data frame for the plotting front-ends.
    ///
    /// # Errors
    /// Propagates any zeromq error in the socket send operation.
    pub async fn publish_frame(
        &mut self,
        straight: &Straight,
        frame: &Frame,
    ) -> zeromq::ZmqResult<()> {
        while self.outgoing_bytes.len() < FRAME_PARTS {
            self.outgoing_bytes.push(Bytes::new());
        }
        for (index, part) in self.outgoing_bytes.iter_mut().enumerate() {
            // recycle each part's allocation between frames
            let mut buffer: Vec<u8> = std::mem::take(part).into();
            buffer.clear();
            match index {
                0 => buffer.extend(self.hostname.as_bytes()),
                1 => buffer.extend(straight.cycle_counter.to_le_bytes()),
                2 => buffer.extend(straight.start_time.elapsed().as_secs().to_le_bytes()),
                3 => buffer.extend(frame.trajectory.iter().flat_map(|p| p.s.to_le_bytes())),
                4 => buffer.extend(
                    frame
                        .trajectory
                        .iter()
                        .flat_map(|p| p.beam.displacement.to_le_bytes()),
                ),
                5 => buffer.extend(frame.photons.iter().flat_map(|p| {
                    [
                        p.source_s,
                        p.emitted.displacement,
                        p.detector_s,
                        p.at_detector.displacement,
                    ]
                    .into_iter()
                    .flat_map(f64::to_le_bytes)
                })),
                6 | 7 => buffer.extend(
                    straight
                        .detector_logs
                        .get(index - 6)
                        .into_iter()
                        .flat_map(|log| log.iter().flat_map(f64::to_le_bytes)),
                ),
                8 => buffer.extend(straight.scales().iter().flat_map(|x| x.to_le_bytes())),
                9 => buffer.extend(straight.offsets().iter().flat_map(|x| x.to_le_bytes())),
                10 => buffer.extend(straight.readback().iter().flat_map(|x| x.to_le_bytes())),
                11 => buffer.extend(frame.kicks.iter().flat_map(|x| x.to_le_bytes())),
                12 => buffer.extend(frame.currents.iter().flat_map(|x| x.to_le_bytes())),
                _ => {}
            }
            *part = Bytes::from(buffer);
        }

        let msg: Vec<Bytes> = self.outgoing_bytes.clone();
        self.data_sock.send(msg.try_into().unwrap()).await
    }
}

fn process_snapshot_command(
    rest: &str,
    straight: &mut Straight,
    snapshot_path: &Path,
) -> Result<String, ()> {
    match rest {
        "SAVE" => {
            let text = toml::to_string(&straight.snapshot()).map_err(|_| ())?;
            match std::fs::write(snapshot_path, text) {
                Ok(()) => Ok(String::new()),
                Err(e) => Ok(format!("failed to write snapshot: {e}")),
            }
        }
        "LOAD" => match std::fs::read_to_string(snapshot_path) {
            Ok(text) => match toml::from_str::<Snapshot>(&text) {
                Ok(snapshot) => {
                    straight.restore(snapshot);
                    Ok(String::new())
                }
                Err(e) => Ok(format!("failed to parse snapshot: {e}")),
            },
            Err(e) => Ok(format!("failed to read snapshot: {e}")),
        },
        _ => Err(()),
    }
}
