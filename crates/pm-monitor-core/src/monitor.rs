//! Monitor supervisor
//!
//! Sources run on dedicated OS threads, since every device turn blocks on the
//! serial port. Their records travel over a bounded channel to one storage
//! task. The first fatal fault from any worker ends the whole run.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::device::{DeviceDriver, Measurement};
use crate::protocol::{ProtocolError, Transport};
use crate::record::SensorRecord;

/// Records buffered between the sources and storage
const RECORD_CHANNEL_CAPACITY: usize = 64;

/// Something that produces sensor records, one blocking poll at a time.
///
/// Recoverable failures are logged by the source and reported as `Ok(None)`.
/// An `Err` is fatal: the source is not polled again and the monitor stops.
pub trait RecordSource: Send + 'static {
    /// Name used for the worker thread and in logs
    fn name(&self) -> &str;

    /// Produce at most one record
    fn poll(&mut self) -> anyhow::Result<Option<SensorRecord>>;

    /// Wait between polls
    fn pause(&self) -> Duration;
}

/// Destination for records. A failed store is fatal.
pub trait RecordSink: Send + 'static {
    fn store(&mut self, record: &SensorRecord) -> anyhow::Result<()>;
}

/// Writes each record as one line of JSON
pub struct JsonLinesSink<W: Write + Send + 'static> {
    out: W,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> RecordSink for JsonLinesSink<W> {
    fn store(&mut self, record: &SensorRecord) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// One PM detector as a record source.
///
/// Each poll: resynchronise the clock when due, read one measurement, stop
/// streaming. The configured intervals are written once, before the first
/// reading. Only a lost link is fatal; every other protocol error is logged
/// and the cycle goes on.
pub struct DeviceCycle<T: Transport> {
    driver: DeviceDriver<T>,
    config: MonitorConfig,
    configured: bool,
    cycles_since_clock_sync: Option<u32>,
}

impl<T: Transport + 'static> DeviceCycle<T> {
    pub fn new(driver: DeviceDriver<T>, config: MonitorConfig) -> Self {
        Self {
            driver,
            config,
            configured: false,
            cycles_since_clock_sync: None,
        }
    }

    pub fn driver(&self) -> &DeviceDriver<T> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut DeviceDriver<T> {
        &mut self.driver
    }

    /// Write the configured send and store intervals
    fn configure(&mut self) -> Result<(), ProtocolError> {
        let send = self.config.send_interval.to_string();
        let store = self.config.store_interval.to_string();
        self.driver.set_send_interval(&send)?;
        self.driver.set_store_interval(&store)?;
        tracing::info!(send_interval = %send, store_interval = %store, "device intervals configured");
        Ok(())
    }

    /// Whether the clock must be set on this cycle. The first cycle always
    /// sets it.
    fn clock_sync_due(&self) -> bool {
        let every = self.config.clock_sync_cycles;
        match self.cycles_since_clock_sync {
            None => true,
            Some(_) if every == 0 => false,
            Some(n) => n + 1 >= every,
        }
    }

    /// Run one measurement cycle
    pub fn run_cycle(&mut self) -> Result<Option<Measurement>, ProtocolError> {
        if !self.configured {
            if let Err(e) = self.configure() {
                escalate(e, "failed to configure intervals")?;
            } else {
                self.configured = true;
            }
        }

        if self.clock_sync_due() {
            match self.driver.set_clock() {
                Ok(time) => {
                    tracing::info!(%time, "device clock synchronised");
                    self.cycles_since_clock_sync = Some(0);
                }
                Err(e) => escalate(e, "failed to set clock")?,
            }
        } else if let Some(n) = self.cycles_since_clock_sync.as_mut() {
            *n += 1;
        }

        let reading = self.driver.read_measurement();
        let stopped = self.driver.stop_streaming();

        let measurement = match reading {
            Ok(m) => Some(m),
            Err(e) => {
                escalate(e, "failed to read measurement")?;
                None
            }
        };
        if let Err(e) = stopped {
            escalate(e, "failed to stop streaming")?;
        }
        Ok(measurement)
    }
}

/// Pass lost-link errors up; log everything else
fn escalate(err: ProtocolError, action: &str) -> Result<(), ProtocolError> {
    if err.is_link_lost() {
        tracing::error!(error = %err, "{}: link lost", action);
        return Err(err);
    }
    match &err {
        ProtocolError::SensorFault(_) => tracing::warn!(error = %err, "{}: sensor fault", action),
        _ => tracing::warn!(error = %err, recoverable = err.is_recoverable(), "{}", action),
    }
    Ok(())
}

impl<T: Transport + 'static> RecordSource for DeviceCycle<T> {
    fn name(&self) -> &str {
        "pm-detector"
    }

    fn poll(&mut self) -> anyhow::Result<Option<SensorRecord>> {
        let measurement = self.run_cycle().context("PM detector failed")?;
        Ok(measurement.map(|m| m.to_record(&self.config.model, self.config.id)))
    }

    fn pause(&self) -> Duration {
        self.config.cycle_pause()
    }
}

/// Runs sources and a sink until cancelled or until the first fatal fault
pub struct Monitor<S: RecordSink> {
    sink: S,
    sources: Vec<Box<dyn RecordSource>>,
    cancel: CancellationToken,
}

impl<S: RecordSink> Monitor<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            sources: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Add a source
    pub fn with_source(mut self, source: impl RecordSource) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Token that stops the monitor cleanly when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled, returning the first fatal fault if there was one.
    ///
    /// A source blocked in a device turn is not interrupted; its thread ends
    /// once that turn returns.
    pub async fn run(self) -> anyhow::Result<()> {
        let Monitor {
            mut sink,
            sources,
            cancel,
        } = self;

        let (record_tx, mut record_rx) = mpsc::channel::<SensorRecord>(RECORD_CHANNEL_CAPACITY);
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel::<anyhow::Error>();
        let handle = Handle::current();

        for source in sources {
            let name = source.name().to_string();
            let spawned = spawn_source(
                source,
                record_tx.clone(),
                fault_tx.clone(),
                cancel.clone(),
                handle.clone(),
            );
            if let Err(e) = spawned {
                cancel.cancel();
                return Err(e).with_context(|| format!("failed to start worker for {}", name));
            }
            tracing::info!(source = %name, "source started");
        }
        drop(record_tx);

        let storage_cancel = cancel.clone();
        let storage_faults = fault_tx;
        let storage = tokio::spawn(async move {
            loop {
                let record = tokio::select! {
                    _ = storage_cancel.cancelled() => break,
                    record = record_rx.recv() => match record {
                        Some(record) => record,
                        None => break,
                    },
                };
                if let Err(e) = sink.store(&record) {
                    tracing::error!(error = %format!("{:#}", e), "storage failed");
                    let _ = storage_faults.send(e.context("storage failed"));
                    return;
                }
                tracing::debug!(model = %record.model, id = record.id, time = %record.time, "record stored");
            }
            // Keep whatever was already handed over
            while let Ok(record) = record_rx.try_recv() {
                if let Err(e) = sink.store(&record) {
                    tracing::warn!(error = %format!("{:#}", e), "dropping buffered records");
                    break;
                }
            }
        });

        let fault = tokio::select! {
            fault = fault_rx.recv() => fault,
            _ = cancel.cancelled() => None,
        };
        cancel.cancel();
        if let Err(e) = storage.await {
            tracing::error!(error = %e, "storage task ended abnormally");
        }

        match fault {
            Some(fault) => Err(fault),
            None => {
                tracing::info!("monitor stopped");
                Ok(())
            }
        }
    }
}

fn spawn_source(
    mut source: Box<dyn RecordSource>,
    records: mpsc::Sender<SensorRecord>,
    faults: mpsc::UnboundedSender<anyhow::Error>,
    cancel: CancellationToken,
    handle: Handle,
) -> std::io::Result<thread::JoinHandle<()>> {
    let name = source.name().to_string();
    thread::Builder::new().name(name.clone()).spawn(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            poll_source(source.as_mut(), &records, &cancel, &handle)
        }));
        let fault = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic_info) => anyhow!("{} panicked: {}", name, panic_message(&panic_info)),
        };
        tracing::error!(source = %name, error = %format!("{:#}", fault), "source failed");
        let _ = faults.send(fault);
    })
}

fn poll_source(
    source: &mut dyn RecordSource,
    records: &mpsc::Sender<SensorRecord>,
    cancel: &CancellationToken,
    handle: &Handle,
) -> anyhow::Result<()> {
    while !cancel.is_cancelled() {
        // Hand the record over before pausing so a cancel during the pause
        // cannot lose it.
        if let Some(record) = source.poll()? {
            if records.blocking_send(record).is_err() {
                if cancel.is_cancelled() {
                    tracing::warn!(source = %source.name(), "storage already stopped, record dropped");
                    break;
                }
                anyhow::bail!("record channel closed");
            }
        }

        let pause = source.pause();
        let cancelled = if pause.is_zero() {
            cancel.is_cancelled()
        } else {
            handle.block_on(async {
                tokio::select! {
                    _ = cancel.cancelled() => true,
                    _ = tokio::time::sleep(pause) => false,
                }
            })
        };
        if cancelled {
            break;
        }
    }
    Ok(())
}

fn panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
