//! The transaction dispatcher.
//!
//! A requester fills in a [`Transaction`] and raises its request with
//! [`Transaction::submit`]. Each call to [`Server::step`] then does one unit
//! of work: accept the request, advance the running state machine, or hand
//! back the result. The [`Device`] and the data buffer belong to the server
//! while a transaction is in flight and come back when it completes.

use crate::blockdevice::{DataBuffer, BLOCK_LEN};
use crate::sdcard::{
    CardStatus, Device, Error, Negotiate, Options, ReadBlock, Transport, TransportError,
    WriteBlock,
};
use crate::{debug, warn};
use core::task::Poll;

/// What a [`Transaction`] asks for.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Request {
    /// Nothing to do
    #[default]
    None,
    /// Negotiate with the card and mount it
    Init,
    /// Read a window of one block into `data`
    Read,
    /// Write `data`, which must be exactly one block, to a sector
    Write,
    /// Ask a mounted card for its status
    Status,
}

/// Whether a [`Transaction`] is in flight.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Ready for a new request; `error_code` holds the last result
    #[default]
    Idle,
    /// The server has accepted the request and not yet finished it
    Busy,
}

/// Returned by [`Transaction::submit`] when a request is already pending or
/// in flight.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Occupied;

/// The mailbox between a requester and the [`Server`].
///
/// Fill in the fields a request needs, then call
/// [`Transaction::submit`]. Once [`Transaction::is_idle`] is true again
/// the result is in `error_code`, and `device` and `data` are back.
#[derive(Debug)]
pub struct Transaction {
    /// The pending request. Cleared by the server when it completes.
    pub request: Request,
    /// The card slot to work on. Absent while the server holds it.
    pub device: Option<Device>,
    /// Read destination or write source.
    pub data: DataBuffer,
    /// The zero-based sector to read or write.
    pub sector: u32,
    /// First byte of the block a read keeps.
    pub offset: u16,
    /// How many bytes of the block a read keeps.
    pub count: u16,
    /// The result of the last completed transaction.
    pub error_code: Result<(), Error>,
    status: Status,
}

impl Transaction {
    /// An idle transaction with no device, set up for whole-block reads.
    pub fn new() -> Transaction {
        Transaction {
            request: Request::None,
            device: None,
            data: DataBuffer::new(),
            sector: 0,
            offset: 0,
            count: BLOCK_LEN as u16,
            error_code: Ok(()),
            status: Status::Idle,
        }
    }

    /// Raise a request.
    ///
    /// Refused while another request is pending or in flight.
    pub fn submit(&mut self, request: Request) -> Result<(), Occupied> {
        if self.status == Status::Busy || self.request != Request::None {
            return Err(Occupied);
        }
        self.request = request;
        Ok(())
    }

    /// Is the transaction in flight?
    pub fn status(&self) -> Status {
        self.status
    }

    /// Is there nothing pending or in flight?
    pub fn is_idle(&self) -> bool {
        self.status == Status::Idle && self.request == Request::None
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::new()
    }
}

/// The operation a running transaction is driving.
#[derive(Debug)]
enum Machine {
    Negotiate(Negotiate),
    Read(ReadBlock),
    Write(WriteBlock),
    Status(CardStatus),
}

/// What the server holds on to while a transaction is in flight.
#[derive(Debug)]
struct Job {
    device: Device,
    data: DataBuffer,
}

#[derive(Debug)]
enum State {
    Idle,
    Running(Machine, Job),
    /// The transport failed. Nothing more goes on the bus until
    /// [`Server::recover`].
    Faulted(TransportError),
}

/// Drives one card slot's transactions, one step at a time.
pub struct Server<T>
where
    T: Transport,
{
    transport: T,
    options: Options,
    state: State,
}

impl<T> Server<T>
where
    T: Transport,
{
    /// Create a new server with the default options.
    pub fn new(transport: T) -> Server<T> {
        Self::new_with_options(transport, Options::default())
    }

    /// Construct a new server with the given options.
    pub fn new_with_options(transport: T, options: Options) -> Server<T> {
        Server {
            transport,
            options,
            state: State::Idle,
        }
    }

    /// Do one unit of work on `trans`.
    ///
    /// Call this once per scheduler activation. Always pass the same
    /// transaction until it completes.
    pub fn step(&mut self, trans: &mut Transaction) {
        self.state = match core::mem::replace(&mut self.state, State::Idle) {
            State::Idle => self.accept(trans),
            State::Faulted(e) => {
                if trans.request != Request::None {
                    warn!("{:?} refused, transport faulted", trans.request);
                    trans.error_code = Err(Error::Transport(e));
                    trans.request = Request::None;
                }
                State::Faulted(e)
            }
            State::Running(mut machine, mut job) => {
                let transport = &mut self.transport;
                let poll = match &mut machine {
                    Machine::Negotiate(m) => m.step(transport, &mut job.device),
                    Machine::Read(m) => m.step(transport, &mut job.device, &mut job.data),
                    Machine::Write(m) => m.step(transport, &mut job.device, &job.data),
                    Machine::Status(m) => m.step(transport),
                };
                match poll {
                    Poll::Pending => State::Running(machine, job),
                    Poll::Ready(result) => self.complete(trans, job, result),
                }
            }
        }
    }

    /// Step `trans` until it completes, and return its result.
    ///
    /// This spins. Use [`Server::step`] from a scheduler instead when there
    /// is other work to do.
    pub fn run(&mut self, trans: &mut Transaction) -> Result<(), Error> {
        self.step(trans);
        while !trans.is_idle() {
            self.step(trans);
        }
        trans.error_code
    }

    /// Leave the faulted state, after the caller has dealt with whatever
    /// broke the transport.
    ///
    /// The card should be negotiated again before further use.
    pub fn recover(&mut self) {
        if self.is_faulted() {
            debug!("Recovering from transport fault");
            self.state = State::Idle;
        }
    }

    /// Did the transport fail?
    pub fn is_faulted(&self) -> bool {
        matches!(self.state, State::Faulted(_))
    }

    /// Is there no transaction in flight?
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// Get a temporary borrow on the underlying transport.
    pub fn transport<F, R>(&mut self, func: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        func(&mut self.transport)
    }

    /// Give back the transport.
    pub fn free(self) -> T {
        self.transport
    }

    /// Take a pending request off `trans` and start its state machine.
    fn accept(&mut self, trans: &mut Transaction) -> State {
        let request = trans.request;
        if request == Request::None {
            return State::Idle;
        }
        let Some(device) = trans.device.take() else {
            warn!("{:?} has no device", request);
            trans.error_code = Err(Error::Parameter);
            trans.request = Request::None;
            return State::Idle;
        };
        let mut job = Job {
            device,
            data: core::mem::take(&mut trans.data),
        };
        let started = match request {
            Request::None | Request::Init => Ok(Machine::Negotiate(Negotiate::new(self.options))),
            Request::Read => ReadBlock::start(
                &job.device,
                trans.sector,
                trans.offset,
                trans.count,
                self.options,
            )
            .map(Machine::Read),
            Request::Write => {
                WriteBlock::start(&job.device, trans.sector, &job.data, self.options)
                    .map(Machine::Write)
            }
            Request::Status => CardStatus::start(&job.device, self.options).map(Machine::Status),
        };
        match started {
            Ok(machine) => {
                debug!("Accepted {:?} for sector {}", request, trans.sector);
                if let Machine::Read(_) = machine {
                    job.data.clear();
                }
                trans.status = Status::Busy;
                State::Running(machine, job)
            }
            Err(e) => {
                debug!("{:?} refused: {:?}", request, e);
                self.complete(trans, job, Err(e))
            }
        }
    }

    /// Hand the result, the device and the data back to `trans`.
    fn complete(&mut self, trans: &mut Transaction, job: Job, result: Result<(), Error>) -> State {
        debug!("Transaction done: {:?}", result);
        trans.device = Some(job.device);
        trans.data = job.data;
        trans.error_code = result;
        trans.status = Status::Idle;
        trans.request = Request::None;
        match result {
            Err(Error::Transport(e)) => {
                warn!("Transport fault {:?}", e);
                let _ = self.transport.release_bus();
                self.transport.stop_timer();
                State::Faulted(e)
            }
            _ => State::Idle,
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
