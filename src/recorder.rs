//! Result disposition and sync
//!
//! Finished temperatures go straight to the publish sink while the link is
//! up and into the flash log while it is down. Once the link returns the log
//! is drained one record per `sync_step`, newest first, followed by a single
//! sync-over notification.

use core::fmt::Debug;

use crate::clock::Timestamp;
use crate::flash::FlashDevice;
use crate::flash_log::{self, Cursor, FlashLog};
use crate::record::FlashRecord;

/// Lowest accepted temperature (inclusive)
pub const MIN_TEMPERATURE_C: f32 = 0.0;
/// Highest accepted temperature (exclusive)
pub const MAX_TEMPERATURE_C: f32 = 100.0;

/// Upstream sink for finished measurements
pub trait Publish {
    type Error: Debug;

    /// Send one result, the payload is the 12 byte record
    fn publish(&mut self, record: &FlashRecord) -> Result<(), Self::Error>;

    /// Signal that every stored result has been sent
    fn sync_over(&mut self) -> Result<(), Self::Error>;
}

/// Network link state
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Link {
    Online,
    Offline,
}

/// What happened to a finished measurement
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Disposition {
    /// Sent upstream
    Published,
    /// Stored in the flash log, with the new write cursor
    Stored(Cursor),
    /// Outside the accepted range, dropped
    Rejected,
}

/// Result of one sync step
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum SyncStep {
    /// A stored record was sent
    Sent(FlashRecord),
    /// The log is empty and sync-over was sent
    Finished,
}

/// Recorder errors
#[derive(PartialEq, Clone, Debug)]
pub enum Error<LogErr, LinkErr> {
    Log(flash_log::Error<LogErr>),
    Link(LinkErr),
    /// Sync needs the link up
    Offline,
}

impl<LogErr, LinkErr> From<flash_log::Error<LogErr>> for Error<LogErr, LinkErr> {
    fn from(e: flash_log::Error<LogErr>) -> Self {
        Error::Log(e)
    }
}

/// Temperature is within the range worth keeping
pub fn is_acceptable(temperature_c: f32) -> bool {
    temperature_c >= MIN_TEMPERATURE_C && temperature_c < MAX_TEMPERATURE_C
}

/// Routes measurements to the sink or the flash log
pub struct Recorder<F, P> {
    log: FlashLog<F>,
    sink: P,
    link: Link,
    syncing: bool,
}

impl<F, P> Recorder<F, P>
where
    F: FlashDevice,
    P: Publish,
{
    /// Create a recorder, starting offline
    pub fn new(log: FlashLog<F>, sink: P) -> Self {
        Self {
            log,
            sink,
            link: Link::Offline,
            syncing: false,
        }
    }

    pub fn link(&self) -> Link {
        self.link
    }

    /// Update the link state
    ///
    /// Losing the link part way through a sync rewinds the drain so the next
    /// sync starts again from the newest record.
    pub fn set_link(&mut self, link: Link) -> Result<(), Error<F::Error, P::Error>> {
        if link == Link::Offline && self.syncing {
            warn!("Link lost during sync");
            self.abort_sync()?;
        }

        if link != self.link {
            info!("Link {:?}", link);
        }
        self.link = link;

        Ok(())
    }

    /// Dispose of a finished measurement
    pub fn record(
        &mut self,
        timestamp: Timestamp,
        temperature_c: f32,
    ) -> Result<Disposition, Error<F::Error, P::Error>> {
        if !is_acceptable(temperature_c) {
            warn!("Rejecting out of range temperature: {:.2} C", temperature_c);
            return Ok(Disposition::Rejected);
        }

        let r = FlashRecord::new(timestamp, temperature_c);

        match self.link {
            Link::Online => {
                self.sink.publish(&r).map_err(Error::Link)?;
                debug!("Published {:.2} C at {}", temperature_c, timestamp);
                Ok(Disposition::Published)
            }
            Link::Offline => {
                let c = self.log.append(&r)?;
                debug!(
                    "Stored {:.2} C at {} ({} pending)",
                    temperature_c,
                    timestamp,
                    self.log.pending()
                );
                Ok(Disposition::Stored(c))
            }
        }
    }

    /// Send the newest stored record, or sync-over once the log is empty
    ///
    /// A record only leaves the log once the sink has accepted it. A publish
    /// failure rewinds the drain and is returned.
    pub fn sync_step(&mut self) -> Result<SyncStep, Error<F::Error, P::Error>> {
        if self.link != Link::Online {
            return Err(Error::Offline);
        }

        self.syncing = true;

        let (slot, r) = match self.log.peek()? {
            Some(v) => v,
            None => {
                self.syncing = false;
                self.sink.sync_over().map_err(Error::Link)?;
                info!("Sync complete");
                return Ok(SyncStep::Finished);
            }
        };

        if let Err(e) = self.sink.publish(&r) {
            warn!("Publish failed during sync: {:?}", e);
            self.abort_sync()?;
            return Err(Error::Link(e));
        }

        self.log.commit_drain(slot)?;

        Ok(SyncStep::Sent(r))
    }

    /// Drain the whole log, returning the number of records sent
    pub fn sync_all(&mut self) -> Result<usize, Error<F::Error, P::Error>> {
        let mut n = 0;
        while let SyncStep::Sent(_) = self.sync_step()? {
            n += 1;
        }
        Ok(n)
    }

    pub fn log(&self) -> &FlashLog<F> {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut FlashLog<F> {
        &mut self.log
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    /// Release the flash log and sink
    pub fn free(self) -> (FlashLog<F>, P) {
        (self.log, self.sink)
    }

    fn abort_sync(&mut self) -> Result<(), Error<F::Error, P::Error>> {
        self.syncing = false;
        self.log.reset_cursors_after_disconnect()?;
        Ok(())
    }
}
