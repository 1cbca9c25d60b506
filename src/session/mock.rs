//! Simulated Session Backend
//!
//! Provides scriptable instruments for testing without physical hardware.
//!
//! # Available Mocks
//!
//! - `MockSessionManager` - opens sessions on simulated instruments
//! - `MockInstrument` - shared handle used to script responses, inject
//!   faults and inspect traffic
//! - `MockSession` - the session handed to device interfaces
//!
//! Every operation that reaches an instrument is recorded as a
//! [`MockEvent`] tagged with the id of the session that issued it, so tests
//! can tell a replaced session from its successor.
//!
//! # Example
//!
//! ```rust
//! use visa_device_manager::session::mock::MockSessionManager;
//! use visa_device_manager::session::{Session, SessionManager};
//!
//! let sessions = MockSessionManager::new();
//! sessions
//!     .instrument("TCPIP::1.2.3.4::INSTR")
//!     .respond("*IDN?", "ACME,Model1,0,1.0");
//!
//! let mut session = sessions.open_session("TCPIP::1.2.3.4::INSTR")?;
//! assert_eq!(session.query("*IDN?")?, "ACME,Model1,0,1.0");
//! # Ok::<(), visa_device_manager::session::SessionError>(())
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::block::{from_ieee_block, to_ascii_block, to_ieee_block, BlockError};
use super::{
    ByteOrder, DataType, Session, SessionError, SessionManager, SessionResult, DEFAULT_CHUNK_SIZE,
};

/// Fault injected into the next operation of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// Operation times out.
    Timeout,
    /// Link drops during the operation.
    ConnectionLost,
    /// Instrument answers with garbage.
    MalformedResponse,
}

impl MockFault {
    fn into_error(self, address: &str) -> SessionError {
        match self {
            MockFault::Timeout => SessionError::Timeout(format!("{address} did not respond")),
            MockFault::ConnectionLost => {
                SessionError::ConnectionLost(format!("{address} closed the connection"))
            }
            MockFault::MalformedResponse => {
                SessionError::MalformedResponse(format!("{address} sent an unreadable response"))
            }
        }
    }
}

/// What a session did to an instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEventKind {
    /// Chunk size changed.
    SetChunkSize(usize),
    /// Query written.
    Query(String),
    /// Binary block read.
    ReadBinary,
    /// Raw payload written.
    Write(Vec<u8>),
}

/// One recorded operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MockEvent {
    /// Id of the issuing session, starting at 1 per instrument.
    pub session: usize,
    /// What happened.
    pub kind: MockEventKind,
}

#[derive(Debug, Default)]
struct InstrumentState {
    responses: HashMap<String, String>,
    blocks: VecDeque<Vec<u8>>,
    block_datatype: DataType,
    block_order: ByteOrder,
    faults: VecDeque<MockFault>,
    offline: bool,
    sessions_opened: usize,
    events: Vec<MockEvent>,
}

/// Shared handle to a simulated instrument.
///
/// Clones refer to the same instrument.
#[derive(Debug, Clone)]
pub struct MockInstrument {
    address: String,
    state: Arc<Mutex<InstrumentState>>,
}

impl MockInstrument {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            state: Arc::new(Mutex::new(InstrumentState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InstrumentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resource address of this instrument.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Answer `command` with `response` on every query.
    pub fn respond(&self, command: &str, response: &str) -> &Self {
        self.lock()
            .responses
            .insert(command.to_string(), response.to_string());
        self
    }

    /// Queue raw bytes for the next binary block read.
    pub fn push_block(&self, block: Vec<u8>) -> &Self {
        self.lock().blocks.push_back(block);
        self
    }

    /// Queue values for the next binary block read, encoded with the
    /// instrument's block format.
    ///
    /// # Errors
    /// Returns a [`BlockError`] if a value does not fit the block datatype.
    pub fn push_values(&self, values: &[f64]) -> Result<&Self, BlockError> {
        let mut state = self.lock();
        let block = to_ieee_block(values, state.block_datatype, state.block_order)?;
        state.blocks.push_back(block);
        drop(state);
        Ok(self)
    }

    /// Format used to decode blocks on read (default: `f`, little-endian).
    pub fn set_block_format(&self, datatype: DataType, byte_order: ByteOrder) -> &Self {
        let mut state = self.lock();
        state.block_datatype = datatype;
        state.block_order = byte_order;
        drop(state);
        self
    }

    /// Fail the next operation with `fault`. Faults queue up.
    pub fn fail_next(&self, fault: MockFault) -> &Self {
        self.lock().faults.push_back(fault);
        self
    }

    /// Take the instrument offline: opens fail with `ResourceNotFound`,
    /// operations on open sessions fail with `ConnectionLost`.
    pub fn set_offline(&self, offline: bool) -> &Self {
        self.lock().offline = offline;
        self
    }

    /// Number of sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    /// Events issued by one session.
    pub fn events_for(&self, session: usize) -> Vec<MockEventKind> {
        self.lock()
            .events
            .iter()
            .filter(|event| event.session == session)
            .map(|event| event.kind.clone())
            .collect()
    }

    /// Raw payloads written by any session, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match &event.kind {
                MockEventKind::Write(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Opens [`MockSession`]s on simulated instruments.
///
/// Instruments are created on first use. Clones share the same instruments,
/// so a test can keep a clone after moving one into a device manager.
#[derive(Debug, Clone, Default)]
pub struct MockSessionManager {
    instruments: Arc<Mutex<HashMap<String, MockInstrument>>>,
}

impl MockSessionManager {
    /// Create a manager with no instruments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the instrument at `address`, created if needed.
    pub fn instrument(&self, address: &str) -> MockInstrument {
        self.instruments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.to_string())
            .or_insert_with(|| MockInstrument::new(address))
            .clone()
    }
}

impl SessionManager for MockSessionManager {
    fn open_session(&self, address: &str) -> SessionResult<Box<dyn Session>> {
        let instrument = self.instrument(address);
        let id = {
            let mut state = instrument.lock();
            if state.offline {
                return Err(SessionError::ResourceNotFound(address.to_string()));
            }
            state.sessions_opened += 1;
            state.sessions_opened
        };

        trace!(resource = address, session = id, "Mock session opened");
        Ok(Box::new(MockSession {
            id,
            instrument,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }))
    }
}

/// Session on a simulated instrument.
#[derive(Debug)]
pub struct MockSession {
    id: usize,
    instrument: MockInstrument,
    chunk_size: usize,
}

impl MockSession {
    /// Lock the instrument, failing if it is offline or a fault is queued.
    fn begin(&self) -> SessionResult<MutexGuard<'_, InstrumentState>> {
        let mut state = self.instrument.lock();
        if state.offline {
            return Err(MockFault::ConnectionLost.into_error(&self.instrument.address));
        }
        if let Some(fault) = state.faults.pop_front() {
            return Err(fault.into_error(&self.instrument.address));
        }
        Ok(state)
    }

    fn record(&self, state: &mut InstrumentState, kind: MockEventKind) {
        state.events.push(MockEvent {
            session: self.id,
            kind,
        });
    }

    fn send(&mut self, payload: Vec<u8>) -> SessionResult<usize> {
        let mut state = self.begin()?;
        let written = payload.len();
        self.record(&mut state, MockEventKind::Write(payload));
        Ok(written)
    }
}

impl Session for MockSession {
    fn resource_name(&self) -> &str {
        &self.instrument.address
    }

    fn query(&mut self, command: &str) -> SessionResult<String> {
        let mut state = self.begin()?;
        self.record(&mut state, MockEventKind::Query(command.to_string()));
        state.responses.get(command).cloned().ok_or_else(|| {
            SessionError::Timeout(format!(
                "no response to {command:?} from {}",
                self.instrument.address
            ))
        })
    }

    fn read_binary_block(&mut self) -> SessionResult<Vec<f64>> {
        let mut state = self.begin()?;
        self.record(&mut state, MockEventKind::ReadBinary);
        let block = state.blocks.pop_front().ok_or_else(|| {
            SessionError::Timeout(format!("no block pending on {}", self.instrument.address))
        })?;
        from_ieee_block(&block, state.block_datatype, state.block_order)
            .map_err(|err| SessionError::MalformedResponse(err.to_string()))
    }

    fn write(&mut self, message: &str) -> SessionResult<usize> {
        self.send(message.as_bytes().to_vec())
    }

    fn write_ascii_values(
        &mut self,
        message: &str,
        values: &[f64],
        separator: &str,
        termination: &str,
    ) -> SessionResult<usize> {
        let payload = format!("{message}{}{termination}", to_ascii_block(values, separator));
        self.send(payload.into_bytes())
    }

    fn write_binary_values(
        &mut self,
        message: &str,
        values: &[f64],
        datatype: DataType,
        byte_order: ByteOrder,
        termination: &str,
    ) -> SessionResult<usize> {
        let block = to_ieee_block(values, datatype, byte_order)?;
        let mut payload = Vec::with_capacity(message.len() + block.len() + termination.len());
        payload.extend_from_slice(message.as_bytes());
        payload.extend_from_slice(&block);
        payload.extend_from_slice(termination.as_bytes());
        self.send(payload)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
        let mut state = self.instrument.lock();
        self.record(&mut state, MockEventKind::SetChunkSize(chunk_size));
    }
}
