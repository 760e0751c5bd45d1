use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use log::{debug, error, info};
use crate::chat::{ChatMessage, MessageStore};
use crate::config::Config;
use crate::def::*;
use crate::message::*;
use crate::page::Page;

/// Answers one request per connection against the shared message store.
pub struct ConnectionHandler {
    store: Arc<Mutex<MessageStore>>,
    page: Page,
}

impl ConnectionHandler {
    pub fn new(store: Arc<Mutex<MessageStore>>, page: Page) -> Self {
        Self { store, page }
    }

    // a panicking handler cannot leave a half written message behind, so poison is ignored
    pub fn store(&self) -> MutexGuard<MessageStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parses the request, writes the response and leaves closing to the caller.
    /// A transport error while reading still gets a 400 written back.
    pub fn handle<S: Read + Write>(&self, stream: S) -> Result<(), ServerError> {
        let mut reader = LineReader::new(stream);
        let response = match ParsedRequest::parse(&mut reader) {
            Ok(request) => {
                debug!("{} {}", request.method, request.target().unwrap_or("-"));
                self.respond(&request)
            }
            Err(e) => {
                error!("{}", e);
                Response::bad_request()
            }
        };

        let stream = reader.get_mut();
        stream.write_all(&response.construct())?;
        stream.flush()?;
        Ok(())
    }

    pub fn respond(&self, request: &ParsedRequest) -> Response<'static> {
        match request.method {
            Method::GET => self.render(&self.store()),
            Method::POST => match ChatMessage::from_form(&request.body) {
                Ok(message) => {
                    let mut store = self.store();
                    store.append(message);
                    debug!("message added, {} stored", store.len());
                    self.render(&store)
                }
                Err(e) => {
                    debug!("rejected post: {}", e);
                    Response::bad_request()
                }
            },
            Method::OTHER => {
                debug!("unsupported request: {}", request.request_line);
                Response::bad_request()
            }
        }
    }

    fn render(&self, store: &MessageStore) -> Response<'static> {
        match self.page.render(store) {
            Ok(html) => Response::page(html),
            Err(e) => {
                error!("{}", e);
                Response::bad_request()
            }
        }
    }
}

/// Counts the connections being served; `acquire` waits while all are taken.
struct Slots {
    max: usize,
    taken: Mutex<usize>,
    freed: Condvar,
}

struct Slot(Arc<Slots>);

impl Slots {
    fn new(max: usize) -> Arc<Self> {
        Arc::new(Self { max: max.max(1), taken: Mutex::new(0), freed: Condvar::new() })
    }

    fn acquire(self: &Arc<Self>) -> Slot {
        let mut taken = self.taken.lock().unwrap_or_else(PoisonError::into_inner);
        while *taken >= self.max {
            taken = self.freed.wait(taken).unwrap_or_else(PoisonError::into_inner);
        }
        *taken += 1;
        Slot(Arc::clone(self))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut taken = self.0.taken.lock().unwrap_or_else(PoisonError::into_inner);
        *taken -= 1;
        self.0.freed.notify_one();
    }
}

pub struct ChatServer {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    slots: Arc<Slots>,
    read_timeout: Duration,
}

impl ChatServer {
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let address = config.address();
        let listener = TcpListener::bind(address)
            .map_err(|source| ServerError::Bind { address: address.to_string(), source })?;
        let handler = ConnectionHandler::new(Arc::new(Mutex::new(MessageStore::new())), Page::new()?);

        Ok(Self {
            listener,
            handler: Arc::new(handler),
            slots: Slots::new(config.max_connections),
            read_timeout: config.read_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts forever, one thread per connection and at most `max_connections` of them.
    /// A failed accept only drops that connection.
    pub fn run(self) {
        if let Ok(address) = self.local_addr() {
            info!("listening on {}", address);
        }

        loop {
            let slot = self.slots.acquire();
            match self.listener.accept() {
                Ok((stream, _)) => {
                    let handler = Arc::clone(&self.handler);
                    let read_timeout = self.read_timeout;
                    thread::spawn(move || {
                        serve(&handler, stream, read_timeout);
                        drop(slot);
                    });
                }
                Err(e) => error!("accept failed: {}", e),
            }
        }
    }

    pub fn listen(self) -> thread::JoinHandle<()> {
        thread::spawn(move || self.run())
    }
}

fn serve(handler: &ConnectionHandler, stream: TcpStream, read_timeout: Duration) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown peer".to_string());
    debug!("connection from {}", peer);

    if let Err(e) = stream.set_read_timeout(Some(read_timeout)) {
        error!("{}: could not set read timeout: {}", peer, e);
    }
    if let Err(e) = handler.handle(&stream) {
        error!("{}: {}", peer, e);
    }
    let _ = stream.shutdown(Shutdown::Write);
    drain(&stream, read_timeout.min(LINGER));
    debug!("connection from {} closed", peer);
}

const LINGER: Duration = Duration::from_secs(1);

// unread request bytes would make the close reset the connection and lose the response
fn drain(mut stream: &TcpStream, linger: Duration) {
    let deadline = Instant::now() + linger;
    let _ = stream.set_read_timeout(Some(linger));
    let mut chunk = [0u8; 1024];
    let mut drained = 0;
    while drained < MAX_BODY_LENGTH && Instant::now() < deadline {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(size) => drained += size,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}
