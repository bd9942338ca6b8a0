//! Line-oriented TCP query server. `SPEC_FULL.md` §8, `spec.md` §6.

use hammer_core::{parse_action_line, CompileError, ExecutorError, HardwareExecutor, Transport};
use log::{error, info, warn};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

/// Accepts connections on `port` (all interfaces) and serves them one at a
/// time through `executor`, matching the single-session-at-a-time model of
/// `spec.md` §5.
///
/// Returns on a fatal executor error (transport failure or an internal
/// compiler invariant violation); malformed requests and oversized payloads
/// are logged and handled per-connection without returning.
pub fn serve<T: Transport>(executor: &mut HardwareExecutor<T>, port: u16) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!("hammer query server listening on port {port}");

    for stream in listener.incoming() {
        let stream = stream?;
        let peer = stream.peer_addr().ok();
        info!("accepted connection from {peer:?}");
        match handle_connection(executor, stream) {
            Ok(()) => info!("connection from {peer:?} closed"),
            Err(ConnectionOutcome::Io(e)) => warn!("connection from {peer:?} dropped: {e}"),
            Err(ConnectionOutcome::Fatal(e)) => {
                error!("fatal executor error, shutting down: {e}");
                return Err(io::Error::other(e.to_string()));
            }
        }
    }
    Ok(())
}

enum ConnectionOutcome<E: std::error::Error> {
    Io(io::Error),
    Fatal(ExecutorError<E>),
}

impl<E: std::error::Error> From<io::Error> for ConnectionOutcome<E> {
    fn from(e: io::Error) -> Self {
        ConnectionOutcome::Io(e)
    }
}

fn handle_connection<T: Transport>(
    executor: &mut HardwareExecutor<T>,
    stream: TcpStream,
) -> Result<(), ConnectionOutcome<T::Error>> {
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            break;
        }

        let actions = match parse_action_line(&line) {
            Ok(actions) => actions,
            Err(e) => {
                warn!("malformed request {line:?} ({e}), closing connection");
                break;
            }
        };

        match executor.execute_hammering_test(&actions) {
            Ok(result) => {
                let json = serde_json::to_string(&result).expect("HammerResult always serializes");
                writeln!(writer, "{json}")?;
            }
            Err(ExecutorError::Compile(CompileError::PayloadTooLarge { len, capacity })) => {
                warn!("request compiled to {len} words, exceeding capacity of {capacity}; returning empty result");
                writeln!(writer, "{{}}")?;
            }
            Err(e) => return Err(ConnectionOutcome::Fatal(e)),
        }
    }
    Ok(())
}
