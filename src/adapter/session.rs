//! Reconnect/backoff/replay state machine
//!
//! Every provider adapter is one tokio task driving a [`Link`] to the
//! provider and at most one open utterance. The task reacts, in priority
//! order, to commands from the handle, to caller input, to link events and
//! to the keep-alive timer.
//!
//! Link states:
//! - `Connecting`: a connection attempt is in flight
//! - `Open`: a session is up; released input goes straight to the wire
//! - `Backoff`: waiting out the retry delay after a failure
//! - `Closed`: the provider closed cleanly while idle; the next utterance reconnects
//! - `Terminal`: the retry budget is spent; the adapter only reports failure
//!
//! A clean close in the middle of an utterance is treated like a lost
//! connection, and the budget is only reset again once the provider has sent
//! something on a later connection.
//!
//! Input is recorded in the sent ledger as soon as the chunking policy
//! releases it, whatever the link state. Each time the link opens, the part
//! of the ledger the provider has not confirmed is sent again for the
//! unchanged epoch, followed by the end marker if input already ended.

use futures::future::BoxFuture;
use futures::StreamExt;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn, Instrument};

use super::chunking::ChunkingPolicy;
use super::confirmation::CompletionCorrection;
use super::ledger::{Payload, SentLedger};
use super::protocol::{Inbound, Protocol};
use super::retry::{RetryDecision, RetryPolicy, RetryState};
use super::{Adapter, AdapterContext, Command, Epoch, Mailbox};
use crate::error::{InputError, ProtocolError, RelayError};
use crate::stream::{AdapterEvent, EventSink, InputStream, Unconsumed};
use crate::transport::{Connector, Frame, Session, TransportEvent};

/// Handle to a provider adapter task
pub struct ProviderAdapter<I> {
    mailbox: Mailbox<I>,
}

impl<I: Payload> ProviderAdapter<I> {
    /// Spawn the adapter task and start connecting right away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<P>(
        protocol: P,
        connector: Arc<dyn Connector>,
        retry: RetryPolicy,
        context: AdapterContext<I, P::Output>,
    ) -> Self
    where
        P: Protocol<Input = I>,
    {
        let (mailbox, commands) = Mailbox::new();
        let AdapterContext { events, span } = context;
        let driver = Driver::new(protocol, connector, retry, events, commands);
        tokio::spawn(driver.run().instrument(span));
        Self { mailbox }
    }
}

impl<I: Payload> Adapter<I> for ProviderAdapter<I> {
    fn start(&mut self, input: InputStream<I>) {
        self.mailbox.start(input);
    }

    fn cancel(&mut self) {
        self.mailbox.cancel();
    }

    fn destroy(&mut self) {
        self.mailbox.destroy();
    }
}

enum Link {
    Connecting(BoxFuture<'static, Result<Session, RelayError>>),
    Open(Session),
    Backoff(Pin<Box<Sleep>>),
    Closed,
    Terminal,
}

enum LinkEvent {
    Connected(Result<Session, RelayError>),
    Transport(Option<TransportEvent>),
    BackoffElapsed,
}

impl Link {
    fn connect(connector: &Arc<dyn Connector>) -> Self {
        let connector = Arc::clone(connector);
        Link::Connecting(Box::pin(async move { connector.connect().await }))
    }

    /// Next event of the current state; never resolves while closed or terminal
    async fn next(&mut self) -> LinkEvent {
        match self {
            Link::Connecting(attempt) => LinkEvent::Connected(attempt.await),
            Link::Open(session) => LinkEvent::Transport(session.recv().await),
            Link::Backoff(sleep) => {
                sleep.as_mut().await;
                LinkEvent::BackoffElapsed
            }
            Link::Closed | Link::Terminal => pending().await,
        }
    }

    fn session(&self) -> Option<&Session> {
        match self {
            Link::Open(session) => Some(session),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Link::Connecting(_) => "connecting",
            Link::Open(_) => "open",
            Link::Backoff(_) => "backoff",
            Link::Closed => "closed",
            Link::Terminal => "terminal",
        }
    }
}

struct KeepAlive {
    interval: Interval,
    frame: Frame,
}

async fn next_input<I>(input: &mut Option<InputStream<I>>) -> Option<Result<I, InputError>> {
    match input {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn next_keep_alive(keep_alive: &mut Option<KeepAlive>) -> Frame {
    match keep_alive {
        Some(keep_alive) => {
            keep_alive.interval.tick().await;
            keep_alive.frame.clone()
        }
        None => pending().await,
    }
}

struct Driver<P: Protocol> {
    protocol: P,
    connector: Arc<dyn Connector>,
    events: EventSink<P::Input, P::Output>,
    commands: mpsc::UnboundedReceiver<Command<P::Input>>,
    retry: RetryState,
    /// Cleared by a clean close mid-utterance; set again by the next provider message
    reset_budget_on_open: bool,
    link: Link,
    keep_alive: Option<KeepAlive>,
    epoch: Epoch,
    /// An utterance is open
    active: bool,
    /// Caller input still being read
    input: Option<InputStream<P::Input>>,
    input_ended: bool,
    chunker: Box<dyn ChunkingPolicy<P::Input>>,
    correction: Box<dyn CompletionCorrection>,
    ledger: SentLedger<P::Input>,
}

impl<P: Protocol> Driver<P> {
    fn new(
        protocol: P,
        connector: Arc<dyn Connector>,
        retry: RetryPolicy,
        events: EventSink<P::Input, P::Output>,
        commands: mpsc::UnboundedReceiver<Command<P::Input>>,
    ) -> Self {
        let chunker = protocol.chunking();
        let correction = protocol.correction();
        let link = Link::connect(&connector);
        Self {
            protocol,
            connector,
            events,
            commands,
            retry: RetryState::new(retry),
            reset_budget_on_open: true,
            link,
            keep_alive: None,
            epoch: Epoch::default(),
            active: false,
            input: None,
            input_ended: false,
            chunker,
            correction,
            ledger: SentLedger::new(),
        }
    }

    async fn run(mut self) {
        info!(
            provider = self.protocol.name(),
            chunking = self.chunker.name(),
            correction = self.correction.name(),
            "adapter started"
        );

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Start(input)) => self.start(input),
                    Some(Command::Cancel) => self.cancel(),
                    Some(Command::Destroy) | None => break,
                },
                item = next_input(&mut self.input) => self.on_input(item),
                event = self.link.next() => self.on_link(event),
                frame = next_keep_alive(&mut self.keep_alive) => {
                    debug!("sending keep-alive");
                    self.transmit(Ok(vec![frame]));
                }
            }
        }

        self.shutdown();
    }

    fn start(&mut self, input: InputStream<P::Input>) {
        if matches!(self.link, Link::Terminal) {
            warn!("adapter already gave up, handing the new input back");
            self.events
                .emit(AdapterEvent::Failed(Unconsumed::new(Vec::new(), Some(input))));
            return;
        }

        if self.active {
            debug!(epoch = %self.epoch, "superseding the open utterance");
            self.shed_late_output();
        }
        self.epoch = self.epoch.next();
        self.reset_utterance();
        self.active = true;
        self.input = Some(input);
        info!(epoch = %self.epoch, link = self.link.name(), "utterance started");

        if matches!(self.link, Link::Closed) {
            self.link = Link::connect(&self.connector);
        }
    }

    fn cancel(&mut self) {
        if !self.active {
            return;
        }
        info!(epoch = %self.epoch, "cancelling utterance");
        self.transmit(self.protocol.encode_cancel(self.epoch));
        self.shed_late_output();
        self.reset_utterance();
        self.active = false;
        self.epoch = self.epoch.next();
    }

    /// Without correlation ids late output of an abandoned utterance would be
    /// credited to the next one, so such providers get a fresh connection
    fn shed_late_output(&mut self) {
        if self.protocol.correlates() {
            return;
        }
        let Link::Open(session) = &mut self.link else {
            return;
        };
        session.close();
        info!(
            provider = self.protocol.name(),
            "reconnecting to shed output of the abandoned utterance"
        );
        self.keep_alive = None;
        self.link = Link::connect(&self.connector);
    }

    fn reset_utterance(&mut self) {
        self.input = None;
        self.input_ended = false;
        self.ledger.clear();
        self.chunker.reset();
        self.correction.reset();
    }

    fn finish_utterance(&mut self) {
        info!(epoch = %self.epoch, "utterance finished");
        self.reset_utterance();
        self.active = false;
        self.events.emit(AdapterEvent::Finished);
    }

    fn on_input(&mut self, item: Option<Result<P::Input, InputError>>) {
        match item {
            Some(Ok(chunk)) => {
                let chunk = self.protocol.prepare(chunk);
                if let Some(ready) = self.chunker.push(chunk) {
                    self.release(ready);
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "input stream failed, ending input");
                self.end_input();
            }
            None => self.end_input(),
        }
    }

    fn release(&mut self, chunk: P::Input) {
        if chunk.is_empty() {
            return;
        }
        if self.link.session().is_some() {
            self.transmit(self.protocol.encode_chunk(self.epoch, &chunk));
        }
        self.ledger.push(chunk);
    }

    fn end_input(&mut self) {
        self.input = None;
        self.input_ended = true;
        if let Some(rest) = self.chunker.flush() {
            self.release(rest);
        }

        if self.ledger.is_empty() {
            self.finish_utterance();
            return;
        }
        debug!(epoch = %self.epoch, chunks = self.ledger.len(), "input ended");
        self.transmit(self.protocol.encode_end(self.epoch));

        // Everything may already have been echoed back before input ended
        if self.correction.is_complete(&self.ledger.text(), true) {
            debug!(policy = self.correction.name(), "completion corrected at end of input");
            self.finish_utterance();
        }
    }

    /// Send frames if the link is open; otherwise they are dropped and the
    /// ledger replay covers them on the next open
    fn transmit(&self, frames: Result<Vec<Frame>, ProtocolError>) {
        let Some(session) = self.link.session() else {
            return;
        };
        match frames {
            Ok(frames) => {
                for frame in frames {
                    if let Err(e) = session.send(frame) {
                        debug!(error = %e, "dropping frame");
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to encode frame"),
        }
    }

    fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected(Ok(session)) => self.on_open(session),
            LinkEvent::Connected(Err(e)) => {
                warn!(error = %e, "connection attempt failed");
                self.on_failure();
            }
            LinkEvent::Transport(Some(TransportEvent::Message(frame))) => self.on_frame(frame),
            LinkEvent::Transport(Some(TransportEvent::Error(message))) => {
                warn!(error = %message, "transport error");
            }
            LinkEvent::Transport(Some(event @ TransportEvent::Closed { .. })) => {
                self.on_closed(event)
            }
            LinkEvent::Transport(None) => self.on_closed(TransportEvent::Closed {
                code: None,
                reason: "transport stopped".to_string(),
            }),
            LinkEvent::BackoffElapsed => {
                info!("reconnecting");
                self.link = Link::connect(&self.connector);
            }
        }
    }

    fn on_open(&mut self, session: Session) {
        info!(provider = self.protocol.name(), "connection opened");
        if self.reset_budget_on_open {
            self.retry.reset();
        }
        self.link = Link::Open(session);
        self.transmit(self.protocol.open_frames());

        self.keep_alive = self.protocol.keep_alive().map(|(period, frame)| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            KeepAlive { interval, frame }
        });

        if !self.active {
            return;
        }
        let replay = self.ledger.unconfirmed(self.correction.confirmed());
        if !replay.is_empty() {
            info!(epoch = %self.epoch, chunks = replay.len(), "sending unconfirmed input");
        }
        for chunk in &replay {
            self.transmit(self.protocol.encode_chunk(self.epoch, chunk));
        }
        if self.input_ended {
            self.transmit(self.protocol.encode_end(self.epoch));
        }
    }

    fn on_closed(&mut self, event: TransportEvent) {
        self.keep_alive = None;
        if event.is_clean_close() {
            if self.active {
                info!("provider closed the connection mid-utterance");
                self.reset_budget_on_open = false;
                self.on_failure();
            } else {
                info!("provider closed the connection");
                self.link = Link::Closed;
            }
            return;
        }
        if let TransportEvent::Closed { code, reason } = &event {
            warn!(?code, %reason, "connection lost");
        }
        self.on_failure();
    }

    fn on_failure(&mut self) {
        self.keep_alive = None;
        match self.retry.record_failure() {
            RetryDecision::Retry { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.link = Link::Backoff(Box::pin(time::sleep(delay)));
            }
            RetryDecision::GiveUp { failures } => {
                error!(failures, "retry budget exhausted, giving up");
                self.link = Link::Terminal;
                self.give_up();
            }
        }
    }

    /// Hand everything the provider has not confirmed to whoever owns us
    fn give_up(&mut self) {
        let mut unconsumed = Unconsumed::empty();
        if self.active {
            let mut chunks = self.ledger.unconfirmed(self.correction.confirmed());
            chunks.extend(self.chunker.flush());
            unconsumed = Unconsumed::new(P::Input::coalesce(chunks), self.input.take());
        }
        self.reset_utterance();
        self.active = false;
        self.events.emit(AdapterEvent::Failed(unconsumed));
    }

    fn on_frame(&mut self, frame: Frame) {
        let messages = match self.protocol.decode(frame) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "ignoring malformed provider frame");
                return;
            }
        };
        if !self.reset_budget_on_open {
            self.reset_budget_on_open = true;
            self.retry.reset();
        }
        for message in messages {
            self.on_inbound(message);
        }
    }

    fn on_inbound(&mut self, message: Inbound<P::Output>) {
        if !self.active {
            debug!("dropping provider message outside an utterance");
            return;
        }
        if let Some(epoch) = message.epoch() {
            if epoch != self.epoch {
                debug!(%epoch, current = %self.epoch, "dropping stale provider message");
                return;
            }
        }

        match message {
            Inbound::Output { data, echo, .. } => {
                if let Some(echo) = echo {
                    let sent = self.ledger.text();
                    if !self.correction.accept_echo(&sent, &echo) {
                        debug!(echo = %echo, "ignoring output for text that was not sent");
                        return;
                    }
                }
                self.events.emit(AdapterEvent::Output(data));
                if self.correction.is_complete(&self.ledger.text(), self.input_ended) {
                    debug!(policy = self.correction.name(), "completion corrected");
                    self.finish_utterance();
                }
            }
            // Only the end marker is known to precede the acknowledgement;
            // anything earlier stays in the ledger for replay
            Inbound::Acknowledged { .. } => {
                if self.input_ended {
                    self.finish_utterance();
                } else {
                    debug!(
                        chunks = self.ledger.len(),
                        "acknowledged before end of input, keeping input"
                    );
                }
            }
            Inbound::Done { .. } => self.finish_utterance(),
            Inbound::Error { message, .. } => {
                warn!(epoch = %self.epoch, %message, "provider reported an error");
            }
        }
    }

    fn shutdown(&mut self) {
        if self.active {
            self.transmit(self.protocol.encode_cancel(self.epoch));
        }
        self.reset_utterance();
        self.active = false;
        self.keep_alive = None;
        if let Link::Open(session) = &mut self.link {
            session.close();
        }
        self.link = Link::Terminal;
        info!("adapter destroyed");
    }
}
