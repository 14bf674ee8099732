//! Request bookkeeping for one connection.
//!
//! ```text
//!   submit ──► [ handshake? ]──live──────────────────────► write
//!                  │ not live: queue front
//!                  ▼
//!              ┌────────┐  Ready && (priority || in_flight < max)
//!   submit ──► │ queue  │ ─────────────────────────────────► write ──► pending
//!              └────────┘  one attempt per resolved response     │
//!                                                                ▼
//!                                                   ack / error resolves
//! ```
//!
//! The outbox never touches the socket. Every mutating call returns the
//! requests that must be written now, in order; the caller writes them.

use std::collections::{HashMap, VecDeque};

use crate::protocol::{Request, RequestBody, RequestId};

/// Connection lifecycle as seen by the request layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    /// Socket open; only the handshake may be written.
    Connected,
    /// Handshake acknowledged; ordinary traffic flows.
    Ready,
    Errored,
}

impl ConnectionState {
    /// A socket exists and accepts writes.
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Ready)
    }

    /// No socket and no attempt under way.
    pub fn is_idle(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }
}

struct Queued<R> {
    request: Request,
    priority: bool,
    responder: R,
}

struct Pending<R> {
    responder: R,
    handshake: bool,
    priority: bool,
}

/// Outcome of resolving a pending request.
pub struct Resolved<R> {
    /// Responder of the resolved request, `None` for unknown ids.
    pub responder: Option<R>,
    /// The handshake ack moved the connection to `Ready`.
    pub ready: bool,
    /// Requests released by this resolution.
    pub writes: Vec<Request>,
}

impl<R> Resolved<R> {
    fn unknown() -> Self {
        Self {
            responder: None,
            ready: false,
            writes: Vec::new(),
        }
    }
}

/// Queue, pending table and backpressure for one transport session.
pub struct Outbox<R> {
    state: ConnectionState,
    next_id: RequestId,
    queue: VecDeque<Queued<R>>,
    pending: HashMap<RequestId, Pending<R>>,
    max_in_flight: usize,
}

impl<R> Outbox<R> {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            state: ConnectionState::Closed,
            next_id: 0,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Assign an id and either release the request or queue it.
    pub fn submit(
        &mut self,
        body: RequestBody,
        priority: bool,
        responder: R,
    ) -> (RequestId, Vec<Request>) {
        self.next_id += 1;
        let id = self.next_id;
        let request = Request::new(id, body);

        if request.body.is_handshake() {
            if self.state.is_live() {
                return (id, vec![self.track(request, priority, responder)]);
            }
            self.queue.push_front(Queued {
                request,
                priority,
                responder,
            });
            return (id, Vec::new());
        }

        let writable = self.state == ConnectionState::Ready
            && (priority || (self.queue.is_empty() && self.has_capacity()));
        if writable {
            return (id, vec![self.track(request, priority, responder)]);
        }

        self.queue.push_back(Queued {
            request,
            priority,
            responder,
        });
        (id, Vec::new())
    }

    /// Socket opened: release the handshake if it heads the queue.
    pub fn on_open(&mut self) -> Vec<Request> {
        self.state = ConnectionState::Connected;
        let handshake_first = self
            .queue
            .front()
            .is_some_and(|queued| queued.request.body.is_handshake());
        if !handshake_first {
            return Vec::new();
        }
        match self.queue.pop_front() {
            Some(queued) => vec![self.track(queued.request, queued.priority, queued.responder)],
            None => Vec::new(),
        }
    }

    /// Resolve a pending request by id.
    ///
    /// `accepted` is false for error replies; a rejected handshake does
    /// not make the connection ready.
    pub fn resolve(&mut self, id: RequestId, accepted: bool) -> Resolved<R> {
        let Some(pending) = self.pending.remove(&id) else {
            return Resolved::unknown();
        };

        let mut ready = false;
        let mut writes = Vec::new();
        if pending.handshake && accepted && self.state == ConnectionState::Connected {
            self.state = ConnectionState::Ready;
            ready = true;
            while let Some(request) = self.pump() {
                writes.push(request);
            }
        } else if let Some(request) = self.pump() {
            writes.push(request);
        }

        Resolved {
            responder: Some(pending.responder),
            ready,
            writes,
        }
    }

    /// Orderly close. Returns every responder still waiting.
    pub fn on_close(&mut self) -> Vec<R> {
        if self.state != ConnectionState::Errored {
            self.state = ConnectionState::Closed;
        }
        self.take_all()
    }

    /// Transport failure. Returns every responder still waiting.
    pub fn on_error(&mut self) -> Vec<R> {
        self.state = ConnectionState::Errored;
        self.take_all()
    }

    /// Final teardown; nothing queued is ever written.
    pub fn dispose(&mut self) -> Vec<R> {
        self.state = ConnectionState::Closed;
        self.take_all()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Awaited responses that count against the ceiling.
    pub fn in_flight(&self) -> usize {
        self.pending
            .values()
            .filter(|pending| !pending.priority && !pending.handshake)
            .count()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    fn has_capacity(&self) -> bool {
        self.in_flight() < self.max_in_flight
    }

    fn track(&mut self, request: Request, priority: bool, responder: R) -> Request {
        self.pending.insert(
            request.id,
            Pending {
                responder,
                handshake: request.body.is_handshake(),
                priority,
            },
        );
        request
    }

    /// One attempt to release the head of the queue.
    fn pump(&mut self) -> Option<Request> {
        if self.state != ConnectionState::Ready {
            return None;
        }
        let front = self.queue.front()?;
        if !front.priority && !self.has_capacity() {
            return None;
        }
        let queued = self.queue.pop_front()?;
        Some(self.track(queued.request, queued.priority, queued.responder))
    }

    fn take_all(&mut self) -> Vec<R> {
        let mut ids: Vec<RequestId> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        let mut responders: Vec<R> = ids
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|pending| pending.responder)
            .collect();
        responders.extend(self.queue.drain(..).map(|queued| queued.responder));
        responders
    }
}
