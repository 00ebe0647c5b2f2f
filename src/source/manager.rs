//! Exclusive source ownership: reconnect and switching.
//!
//! `SourceManager` holds at most one open handle at any time. Read failures
//! release the handle and let the capture loop retry after a backoff; capture
//! is best-effort, so reconnection is retried indefinitely until an explicit
//! stop. Switching always fully closes the current handle before the new one
//! is opened and falls back to the default source id when the requested one
//! cannot be opened within the bounded retry budget.

use std::time::Duration;

use crate::config::SourceSettings;
use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::{open_source, FrameSource, NegotiatedParams};

/// Factory used to open sources by id. Injectable so tests can count handle
/// lifecycles and script failures.
pub type SourceOpener =
    Box<dyn FnMut(&str) -> Result<Box<dyn FrameSource>, SourceError> + Send>;

pub struct SourceManager {
    opener: SourceOpener,
    current: Option<Box<dyn FrameSource>>,
    current_id: String,
    default_id: String,
    switch_retries: u32,
    retry_pause: Duration,
    reconnects: u64,
}

impl SourceManager {
    pub fn new(settings: &SourceSettings) -> Self {
        let opener_settings = settings.clone();
        Self::with_opener(
            Box::new(move |id| open_source(id, &opener_settings)),
            &settings.id,
            &settings.default_id,
            settings.switch_retries,
        )
    }

    pub fn with_opener(
        opener: SourceOpener,
        id: &str,
        default_id: &str,
        switch_retries: u32,
    ) -> Self {
        Self {
            opener,
            current: None,
            current_id: id.to_string(),
            default_id: default_id.to_string(),
            switch_retries,
            retry_pause: Duration::from_millis(100),
            reconnects: 0,
        }
    }

    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Handle releases forced by read failures. Reported via metrics.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn negotiated(&self) -> Option<NegotiatedParams> {
        self.current.as_ref().map(|s| s.negotiated())
    }

    /// Read one frame, opening the source first if needed. On failure the
    /// handle is released and the error returned; the caller decides how long
    /// to back off before calling again. This method never sleeps, so a
    /// caller holding a lock around it stays responsive.
    pub fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if self.current.is_none() {
            let source = (self.opener)(&self.current_id)?;
            log::info!(
                "source '{}' opened, negotiated {:?}",
                self.current_id,
                source.negotiated()
            );
            self.current = Some(source);
        }
        match self.current.as_mut().map(|s| s.read_frame()) {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(err)) => {
                log::warn!("read failed on '{}': {err}, releasing handle", self.current_id);
                self.close();
                self.reconnects += 1;
                Err(err)
            }
            None => Err(SourceError::Closed),
        }
    }

    /// Release the current handle. Idempotent; the handle's own `close` runs
    /// exactly once per open.
    pub fn close(&mut self) {
        if let Some(mut source) = self.current.take() {
            source.close();
            log::info!("source '{}' released", self.current_id);
        }
    }

    /// Switch to a new source id. The current handle is fully released before
    /// any open attempt, so two handles are never held simultaneously. Blocks
    /// the caller until the new source opens, or until the bounded retry
    /// budget is exhausted and the default source has been tried as fallback.
    /// Returns the id that actually ended up open.
    pub fn switch_source(&mut self, new_id: &str) -> Result<String, SourceError> {
        self.close();
        match self.try_open_with_retries(new_id) {
            Ok(source) => {
                self.current_id = new_id.to_string();
                self.current = Some(source);
                Ok(self.current_id.clone())
            }
            Err(err) => {
                log::warn!(
                    "switch to '{new_id}' failed after {} attempts ({err}), falling back to '{}'",
                    self.switch_retries,
                    self.default_id
                );
                let fallback = self.try_open_with_retries(&self.default_id.clone())?;
                self.current_id = self.default_id.clone();
                self.current = Some(fallback);
                Ok(self.current_id.clone())
            }
        }
    }

    fn try_open_with_retries(&mut self, id: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        let mut last_err = SourceError::Closed;
        for attempt in 0..self.switch_retries.max(1) {
            if attempt > 0 {
                std::thread::sleep(self.retry_pause);
            }
            match (self.opener)(id) {
                Ok(source) => return Ok(source),
                Err(err) => {
                    log::warn!("open attempt {} for '{id}' failed: {err}", attempt + 1);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::source::NegotiatedParams;

    /// Source that counts close calls and fails reads on demand.
    struct CountingSource {
        id: String,
        closes: Arc<AtomicU32>,
        fail_reads: bool,
        seq: u64,
    }

    impl FrameSource for CountingSource {
        fn id(&self) -> &str {
            &self.id
        }

        fn read_frame(&mut self) -> Result<Frame, SourceError> {
            if self.fail_reads {
                return Err(SourceError::Read {
                    id: self.id.clone(),
                    reason: "scripted failure".into(),
                });
            }
            self.seq += 1;
            Ok(Frame::new(vec![0u8; 12], 2, 2, self.seq))
        }

        fn negotiated(&self) -> NegotiatedParams {
            NegotiatedParams {
                width: 2,
                height: 2,
                fps: 30,
            }
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_opener(closes: Arc<AtomicU32>, fail_reads: bool) -> SourceOpener {
        Box::new(move |id| {
            Ok(Box::new(CountingSource {
                id: id.to_string(),
                closes: closes.clone(),
                fail_reads,
                seq: 0,
            }) as Box<dyn FrameSource>)
        })
    }

    #[test]
    fn switch_releases_previous_handle_exactly_once() {
        let closes = Arc::new(AtomicU32::new(0));
        let mut mgr =
            SourceManager::with_opener(counting_opener(closes.clone(), false), "a", "a", 3);
        mgr.read_frame().unwrap();

        // Repeated rapid switches: each switch closes exactly the one open
        // handle, never double-releases.
        mgr.switch_source("b").unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        mgr.switch_source("c").unwrap();
        mgr.switch_source("d").unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert_eq!(mgr.current_id(), "d");
    }

    #[test]
    fn read_failure_releases_handle_and_reopens_on_next_read() {
        let closes = Arc::new(AtomicU32::new(0));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in_opener = attempts.clone();
        let closes_in_opener = closes.clone();
        let opener: SourceOpener = Box::new(move |id| {
            // First handle fails every read; later handles are healthy.
            let fail = attempts_in_opener.fetch_add(1, Ordering::SeqCst) == 0;
            Ok(Box::new(CountingSource {
                id: id.to_string(),
                closes: closes_in_opener.clone(),
                fail_reads: fail,
                seq: 0,
            }) as Box<dyn FrameSource>)
        });

        let mut mgr = SourceManager::with_opener(opener, "cam", "cam", 3);
        assert!(mgr.read_frame().is_err());
        assert!(!mgr.is_open());
        assert_eq!(mgr.reconnects(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Next read reopens and succeeds.
        assert!(mgr.read_frame().is_ok());
        assert_eq!(mgr.reconnects(), 1);
    }

    #[test]
    fn switch_falls_back_to_default_after_bounded_retries() {
        let closes = Arc::new(AtomicU32::new(0));
        let closes_in_opener = closes.clone();
        let opener: SourceOpener = Box::new(move |id| {
            if id == "broken" {
                return Err(SourceError::Open {
                    id: id.to_string(),
                    reason: "no such device".into(),
                });
            }
            Ok(Box::new(CountingSource {
                id: id.to_string(),
                closes: closes_in_opener.clone(),
                fail_reads: false,
                seq: 0,
            }) as Box<dyn FrameSource>)
        });

        let mut mgr = SourceManager::with_opener(opener, "cam", "cam", 2);
        mgr.read_frame().unwrap();
        let opened = mgr.switch_source("broken").unwrap();
        assert_eq!(opened, "cam");
        assert_eq!(mgr.current_id(), "cam");
        assert!(mgr.is_open());
    }
}
