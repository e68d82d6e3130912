//! TCP broker server for the channel adapter
//!
//! Exposes an in-process [`Broker`] over the wire protocol: one connection
//! per session, one thread per connection, requests answered in order. A
//! dropped connection rolls its session's unit of work back, which is what
//! gives the channel adapter the same crash semantics as the direct one.

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::wire::{write_frame, Request, Response, MAX_FRAME_LEN};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often idle loops re-check the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A running broker server
pub struct BrokerServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl BrokerServer {
    /// Bind and start serving. `bind` may use port 0 to let the OS pick.
    pub fn start(broker: Arc<Broker>, bind: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind)?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || accept_loop(listener, broker, shutdown))
        };

        info!(addr = %local_addr, "broker server listening");
        Ok(Self {
            local_addr,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wind down connection handlers.
    ///
    /// Handlers notice the flag within one poll interval; one blocked in a
    /// long broker wait finishes that wait first.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        info!(addr = %self.local_addr, "broker server stopped");
    }
}

impl Drop for BrokerServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, broker: Arc<Broker>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "connection accepted");
                let broker = Arc::clone(&broker);
                let shutdown = Arc::clone(&shutdown);
                std::thread::spawn(move || {
                    if let Err(e) = serve_connection(stream, &broker, &shutdown) {
                        debug!(peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn serve_connection(
    mut stream: TcpStream,
    broker: &Broker,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;

    let mut session: Option<u64> = None;
    let result = serve_requests(&mut stream, broker, shutdown, &mut session);

    // Whatever ended the connection, the session's unit of work must not
    // survive it.
    if let Some(sid) = session {
        broker.close_session(sid);
    }
    result
}

fn serve_requests(
    stream: &mut TcpStream,
    broker: &Broker,
    shutdown: &AtomicBool,
    session: &mut Option<u64>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        let request = match next_request(stream)? {
            ReadOutcome::TimedOut => continue,
            ReadOutcome::Eof => return Ok(()),
            ReadOutcome::Frame(request) => request,
        };

        let detach = matches!(request, Request::Detach);
        let response = dispatch(broker, session, request);
        write_frame(stream, &response)?;
        if detach {
            return Ok(());
        }
    }
}

fn dispatch(broker: &Broker, session: &mut Option<u64>, request: Request) -> Response {
    if let Request::Attach { client } = &request {
        let sid = broker.open_session();
        debug!(client = %client, session = sid, "session attached");
        *session = Some(sid);
        return Response::Attached {
            broker: broker.name().to_string(),
        };
    }

    let sid = match session {
        Some(sid) => *sid,
        None => {
            return Response::Fault {
                op: "attach".to_string(),
                queue: String::new(),
                reason: crate::error::reason::PROTOCOL,
                detail: "first frame must be Attach".to_string(),
            }
        }
    };

    let result = match request {
        Request::Attach { .. } => unreachable!("handled above"),
        Request::EnsureQueue { queue } => {
            broker.ensure_queue(&queue);
            Ok(Response::Ok)
        }
        Request::Put {
            queue,
            message,
            syncpoint,
        } => broker.put(sid, &queue, message, syncpoint).map(|_| Response::Ok),
        Request::Get {
            queue,
            selector,
            syncpoint,
            wait_ms,
        } => broker
            .get(sid, &queue, &selector, syncpoint, Duration::from_millis(wait_ms))
            .map(Response::Message),
        Request::Browse { queue, first } => {
            broker.browse(sid, &queue, first).map(Response::Message)
        }
        Request::Depth { queue } => broker.depth(&queue).map(Response::Depth),
        Request::Commit => broker.commit(sid).map(|_| Response::Ok),
        Request::Rollback => broker.rollback(sid).map(|_| Response::Ok),
        Request::Detach => {
            broker.close_session(sid);
            *session = None;
            Ok(Response::Ok)
        }
    };

    match result {
        Ok(response) => response,
        Err(e) => Response::from_error(&e),
    }
}

enum ReadOutcome {
    Frame(Request),
    TimedOut,
    Eof,
}

/// Read one request frame, tolerating read timeouts so the caller can
/// re-check the shutdown flag between frames
fn next_request(stream: &mut TcpStream) -> Result<ReadOutcome> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match stream.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(ReadOutcome::Eof),
            Ok(0) => {
                return Err(Error::Wire("connection closed mid-frame".to_string()));
            }
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) => {
                if filled == 0 {
                    return Ok(ReadOutcome::TimedOut);
                }
                // Mid-prefix: the rest of the frame is already in flight
            }
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Wire(format!(
            "peer announced frame of {} bytes, limit is {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    let mut filled = 0;
    while filled < body.len() {
        match stream.read(&mut body[filled..]) {
            Ok(0) => return Err(Error::Wire("connection closed mid-frame".to_string())),
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let request = bincode::deserialize(&body).map_err(|e| Error::Wire(e.to_string()))?;
    Ok(ReadOutcome::Frame(request))
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
