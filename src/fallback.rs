//! Provider fallback
//!
//! A [`FallbackAdapter`] presents one stable adapter to the caller while
//! rotating through an ordered list of adapter factories. When the current
//! adapter gives up, the next factory (wrapping around to the first) builds
//! its replacement and the unconsumed input is replayed into it.
//!
//! Each built adapter emits into the orchestrator's own channel under a
//! fresh generation number, so events from a replaced adapter are told apart
//! from those of the current one:
//! - output and finished events are forwarded only from the current adapter
//! - a failure of the current adapter triggers the rotation
//! - a failure of a replaced adapter only has its input resubmitted

use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::adapter::{Adapter, AdapterContext, AdapterFactory, Command, Mailbox, Payload};
use crate::error::RelayError;
use crate::stream::{event_channel, AdapterEvent, EventSink, Events, InputStream, Unconsumed};

/// Rotation limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackOptions {
    /// Full passes over the provider list before giving up. `None` cycles
    /// forever.
    pub max_rounds: Option<u32>,
}

/// Adapter that fails over between providers
pub struct FallbackAdapter<I> {
    mailbox: Mailbox<I>,
}

impl<I: Payload> FallbackAdapter<I> {
    /// Build the first provider's adapter and start the orchestrator task.
    ///
    /// An empty provider list is a configuration error.
    pub fn new<O: Send + 'static>(
        factories: Vec<AdapterFactory<I, O>>,
        options: FallbackOptions,
        context: AdapterContext<I, O>,
    ) -> Result<Self, RelayError> {
        if factories.is_empty() {
            return Err(RelayError::NoProviders);
        }

        let (mailbox, commands) = Mailbox::new();
        let AdapterContext { events, span } = context;
        let (inner_sink, inner) = event_channel();
        let mut orchestrator = Orchestrator {
            factories,
            options,
            outer: events,
            inner_sink,
            inner,
            commands,
            span: span.clone(),
            index: None,
            generation: 0,
            current: None,
            failures: 0,
        };
        {
            let _entered = span.enter();
            orchestrator.activate_next();
        }
        tokio::spawn(orchestrator.run().instrument(span));
        Ok(Self { mailbox })
    }
}

impl<I: Payload> Adapter<I> for FallbackAdapter<I> {
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

struct Orchestrator<I, O> {
    factories: Vec<AdapterFactory<I, O>>,
    options: FallbackOptions,
    /// The caller's sink
    outer: EventSink<I, O>,
    /// Template for the sinks handed to built adapters
    inner_sink: EventSink<I, O>,
    inner: Events<I, O>,
    commands: mpsc::UnboundedReceiver<Command<I>>,
    span: Span,
    /// Factory of the current adapter; `None` before the first one
    index: Option<usize>,
    generation: u64,
    current: Option<Box<dyn Adapter<I>>>,
    /// Consecutive failures without output in between
    failures: usize,
}

impl<I: Payload, O: Send + 'static> Orchestrator<I, O> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Start(input)) => self.start(input),
                    Some(Command::Cancel) => {
                        if let Some(adapter) = self.current.as_mut() {
                            adapter.cancel();
                        }
                    }
                    Some(Command::Destroy) | None => break,
                },
                Some((source, event)) = self.inner.recv_tagged() => self.on_event(source, event),
            }
        }

        self.teardown();
    }

    /// Destroy the current adapter and build the next one in the list
    fn activate_next(&mut self) {
        if let Some(mut previous) = self.current.take() {
            previous.destroy();
        }

        let index = self.index.map_or(0, |i| (i + 1) % self.factories.len());
        self.index = Some(index);
        self.generation += 1;

        let span = info_span!(parent: &self.span, "provider", index, generation = self.generation);
        info!(index, generation = self.generation, "activating provider");
        let context = AdapterContext::new(self.inner_sink.with_source(self.generation), span);
        self.current = Some((self.factories[index])(context));
    }

    fn start(&mut self, input: InputStream<I>) {
        if self.current.is_none() {
            info!("starting a fresh rotation");
            self.index = None;
            self.failures = 0;
            self.activate_next();
        }
        if let Some(adapter) = self.current.as_mut() {
            adapter.start(input);
        }
    }

    fn on_event(&mut self, source: u64, event: AdapterEvent<I, O>) {
        let is_current = self.current.is_some() && source == self.generation;
        match event {
            AdapterEvent::Output(data) if is_current => {
                self.failures = 0;
                self.outer.emit(AdapterEvent::Output(data));
            }
            AdapterEvent::Finished if is_current => {
                self.failures = 0;
                self.outer.emit(AdapterEvent::Finished);
            }
            AdapterEvent::Output(_) | AdapterEvent::Finished => {
                debug!(source, "dropping event from a replaced provider");
            }
            AdapterEvent::Failed(unconsumed) if is_current => self.on_failed(unconsumed),
            AdapterEvent::Failed(unconsumed) => self.resubmit(source, unconsumed),
        }
    }

    fn on_failed(&mut self, unconsumed: Unconsumed<I>) {
        self.failures += 1;
        warn!(
            index = ?self.index,
            generation = self.generation,
            failures = self.failures,
            chunks = unconsumed.chunks.len(),
            "provider failed"
        );

        if let Some(rounds) = self.options.max_rounds {
            let limit = rounds.max(1) as usize * self.factories.len();
            if self.failures >= limit {
                error!(failures = self.failures, "every provider failed, giving up");
                if let Some(mut adapter) = self.current.take() {
                    adapter.destroy();
                }
                self.index = None;
                self.failures = 0;
                self.outer.emit(AdapterEvent::Failed(unconsumed));
                return;
            }
        }

        self.activate_next();
        if !unconsumed.is_empty() {
            info!(chunks = unconsumed.chunks.len(), "replaying unconsumed input");
            if let Some(adapter) = self.current.as_mut() {
                adapter.start(unconsumed.into_stream());
            }
        }
    }

    /// Input handed back by a replaced adapter goes to the current one
    fn resubmit(&mut self, source: u64, unconsumed: Unconsumed<I>) {
        if unconsumed.is_empty() {
            debug!(source, "ignoring failure of a replaced provider");
            return;
        }
        match self.current.as_mut() {
            Some(adapter) => {
                info!(source, "resubmitting input from a replaced provider");
                adapter.start(unconsumed.into_stream());
            }
            None => {
                self.outer.emit(AdapterEvent::Failed(unconsumed));
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut adapter) = self.current.take() {
            adapter.destroy();
        }
        self.index = None;
        info!("fallback destroyed");
    }
}
