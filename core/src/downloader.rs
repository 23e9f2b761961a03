//! Image downloader.
//!
//! Fetches one location into memory. The downloader exposes a job
//! interface to its supervisor and an xfer interface to whatever source the
//! openers produced for the location; delivered data lands in an
//! [`XferBuffer`].

use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use crate::error::{Error, Result, Status};
use crate::interface::{plug_plug, shutdown_all, Interface};
use crate::iobuf::IoBuffer;
use crate::job::{Job, Progress};
use crate::open::{Location, Openers};
use crate::refcnt::Refcnt;
use crate::xfer::{Metadata, Xfer};
use crate::xferbuf::XferBuffer;

pub struct Downloader {
    me: Weak<Downloader>,
    refcnt: Refcnt,
    job: Interface<dyn Job>,
    xfer: Interface<dyn Xfer>,
    openers: Rc<Openers>,
    buffer: RefCell<XferBuffer>,
    location: RefCell<Location>,
    image: RefCell<Option<Vec<u8>>>,
    status: Cell<Option<Status>>,
}

impl Downloader {
    /// Start downloading `location` under the supervision of `parent`.
    ///
    /// `parent` is told the outcome through `done`. On failure to open,
    /// that has already happened by the time this returns.
    pub fn create(
        openers: &Rc<Openers>,
        parent: &Rc<dyn Job>,
        location: &Location,
    ) -> Result<Rc<Self>> {
        let downloader = Rc::new_cyclic(|me: &Weak<Self>| {
            let weak = me.clone();
            Self {
                me: me.clone(),
                refcnt: Refcnt::with_release(move || {
                    if let Some(dl) = weak.upgrade() {
                        log::debug!("[DL] {:p} released", Rc::as_ptr(&dl));
                        dl.buffer.borrow_mut().free();
                    }
                }),
                job: Interface::new(),
                xfer: Interface::new(),
                openers: openers.clone(),
                buffer: RefCell::new(XferBuffer::growable()),
                location: RefCell::new(location.clone()),
                image: RefCell::new(None),
                status: Cell::new(None),
            }
        });
        log::info!("[DL] {:p} downloading {}", Rc::as_ptr(&downloader), location);

        let job: Rc<dyn Job> = downloader.clone();
        plug_plug(&job, parent);

        let xfer: Rc<dyn Xfer> = downloader.clone();
        let rc = downloader.openers.open(&xfer, location);

        if let Err(e) = rc {
            downloader.finished(Err(e));
        }
        // The interfaces hold it from here on.
        downloader.refcnt.put();
        rc.map(|()| downloader)
    }

    fn finished(&self, rc: Status) {
        match rc {
            Ok(()) => {
                let image = self.buffer.borrow_mut().detach();
                let len = image.as_ref().map_or(0, Vec::len);
                log::info!("[DL] {:p} complete, {} bytes", self, len);
                *self.image.borrow_mut() = image;
            }
            Err(e) => log::warn!("[DL] {:p} failed: {}", self, e),
        }
        self.status.set(Some(rc));
        shutdown_all(rc, &[&self.xfer, &self.job]);
    }

    /// Outcome, once finished.
    pub fn status(&self) -> Option<Status> {
        self.status.get()
    }

    /// Location currently being fetched (changes on redirect).
    pub fn location(&self) -> Location {
        self.location.borrow().clone()
    }

    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.buffer.borrow().pos()
    }

    /// The downloaded image, after a successful finish.
    pub fn take_image(&self) -> Option<Vec<u8>> {
        self.image.borrow_mut().take()
    }
}

impl Xfer for Downloader {
    fn port(&self) -> Option<&Interface<dyn Xfer>> {
        Some(&self.xfer)
    }

    fn refcnt(&self) -> Option<&Refcnt> {
        Some(&self.refcnt)
    }

    fn close(&self, rc: Status) {
        self.finished(rc);
    }

    fn deliver(&self, iobuf: IoBuffer, meta: &Metadata) -> Status {
        let rc = self.buffer.borrow_mut().deliver(iobuf, meta);
        if let Err(e) = rc {
            self.finished(Err(e));
        }
        rc
    }

    fn redirect(&self, location: &Location) -> Status {
        let me: Rc<dyn Xfer> = self.me.upgrade().ok_or(Error::NotConnected)?;
        log::info!("[DL] {:p} redirected to {}", self, location);
        *self.location.borrow_mut() = location.clone();

        let rc = self.openers.reopen(&me, location);
        match rc {
            Ok(()) => self.xfer.window_changed(),
            Err(e) => self.finished(Err(e)),
        }
        rc
    }
}

impl Job for Downloader {
    fn port(&self) -> Option<&Interface<dyn Job>> {
        Some(&self.job)
    }

    fn refcnt(&self) -> Option<&Refcnt> {
        Some(&self.refcnt)
    }

    fn done(&self, rc: Status) {
        self.finished(rc);
    }

    fn kill(&self) {
        self.finished(Err(Error::Canceled));
    }

    fn progress(&self, progress: &mut Progress) -> Status {
        let buffer = self.buffer.borrow();
        progress.completed = buffer.pos() as u64;
        progress.total = buffer.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::Uri;

    #[derive(Default)]
    struct Supervisor {
        job: Interface<dyn Job>,
        finished: Cell<Option<Status>>,
    }

    impl Job for Supervisor {
        fn port(&self) -> Option<&Interface<dyn Job>> {
            Some(&self.job)
        }

        fn done(&self, rc: Status) {
            self.finished.set(Some(rc));
            self.job.restart(rc);
        }
    }

    /// Source the test drives by hand.
    #[derive(Default)]
    struct Source {
        xfer: Interface<dyn Xfer>,
        closed: Cell<Option<Status>>,
    }

    impl Xfer for Source {
        fn port(&self) -> Option<&Interface<dyn Xfer>> {
            Some(&self.xfer)
        }

        fn close(&self, rc: Status) {
            self.closed.set(Some(rc));
            self.xfer.restart(rc);
        }
    }

    struct SourceOpener {
        opened: RefCell<Vec<Rc<Source>>>,
    }

    impl crate::open::UriOpener for SourceOpener {
        fn scheme(&self) -> &str {
            "test"
        }

        fn open(&self, parent: &Rc<dyn Xfer>, _uri: &Uri) -> Status {
            let source = Rc::new(Source::default());
            let endpoint: Rc<dyn Xfer> = source.clone();
            plug_plug(parent, &endpoint);
            self.opened.borrow_mut().push(source);
            Ok(())
        }
    }

    fn setup() -> (Rc<Openers>, Rc<SourceOpener>, Rc<Supervisor>) {
        let openers = Rc::new(Openers::new());
        let opener = Rc::new(SourceOpener {
            opened: RefCell::new(Vec::new()),
        });
        openers.register_uri(opener.clone());
        (openers, opener, Rc::new(Supervisor::default()))
    }

    fn location(uri: &str) -> Location {
        Location::Uri(Uri::parse(uri).unwrap())
    }

    #[test]
    fn assembles_image_and_reports_done() {
        let (openers, opener, sup) = setup();
        let parent: Rc<dyn Job> = sup.clone();
        let dl = Downloader::create(&openers, &parent, &location("test:kernel")).unwrap();
        let source = opener.opened.borrow()[0].clone();

        source.xfer.seek(10).unwrap();
        source.xfer.seek(0).unwrap();
        source.xfer.deliver_raw(b"vmlinuz").unwrap();

        let mut progress = Progress::default();
        sup.job.progress(&mut progress).unwrap();
        assert_eq!((progress.completed, progress.total), (7, 10));

        source.xfer.shutdown(Ok(()));
        assert_eq!(sup.finished.get(), Some(Ok(())));
        assert_eq!(dl.status(), Some(Ok(())));
        assert!(dl.refcnt.is_released());
        let image = dl.take_image().unwrap();
        assert_eq!(&image[..7], b"vmlinuz");
        assert_eq!(image.len(), 10);
    }

    #[test]
    fn unknown_scheme_fails_through_done() {
        let (openers, _opener, sup) = setup();
        let parent: Rc<dyn Job> = sup.clone();
        let rc = Downloader::create(&openers, &parent, &location("gopher://x/"));
        assert!(matches!(rc, Err(Error::NotSupported)));
        assert_eq!(sup.finished.get(), Some(Err(Error::NotSupported)));
    }

    #[test]
    fn kill_cancels_and_closes_source() {
        let (openers, opener, sup) = setup();
        let parent: Rc<dyn Job> = sup.clone();
        let dl = Downloader::create(&openers, &parent, &location("test:initrd")).unwrap();
        let source = opener.opened.borrow()[0].clone();

        sup.job.kill();

        assert_eq!(sup.finished.get(), Some(Err(Error::Canceled)));
        assert_eq!(source.closed.get(), Some(Err(Error::Canceled)));
        assert_eq!(dl.take_image(), None);
        assert!(!source.xfer.is_plugged());
    }

    #[test]
    fn redirect_reopens_the_data_interface() {
        let (openers, opener, sup) = setup();
        let parent: Rc<dyn Job> = sup.clone();
        let dl = Downloader::create(&openers, &parent, &location("test:old")).unwrap();
        let first = opener.opened.borrow()[0].clone();

        first.xfer.redirect(&location("test:new")).unwrap();

        let second = opener.opened.borrow()[1].clone();
        assert_eq!(first.closed.get(), Some(Err(Error::WouldBlock)));
        assert!(second.xfer.is_plugged());
        assert_eq!(dl.location(), location("test:new"));
        assert!(sup.finished.get().is_none());

        second.xfer.deliver_raw(b"ok").unwrap();
        second.xfer.shutdown(Ok(()));
        assert_eq!(dl.take_image(), Some(b"ok".to_vec()));
    }

    #[test]
    fn failed_redirect_finishes_download() {
        let (openers, opener, sup) = setup();
        let parent: Rc<dyn Job> = sup.clone();
        let _dl = Downloader::create(&openers, &parent, &location("test:old")).unwrap();
        let first = opener.opened.borrow()[0].clone();

        let rc = first.xfer.redirect(&location("ftp://elsewhere/"));
        assert_eq!(rc, Err(Error::NotSupported));
        assert_eq!(sup.finished.get(), Some(Err(Error::NotSupported)));
    }

    #[test]
    fn out_of_range_delivery_is_not_fatal_to_callers() {
        let (openers, opener, sup) = setup();
        let parent: Rc<dyn Job> = sup.clone();
        let _dl = Downloader::create(&openers, &parent, &location("test:x")).unwrap();
        let source = opener.opened.borrow()[0].clone();

        let meta = Metadata::absolute(-4);
        assert_eq!(source.xfer.deliver_raw_meta(b"bad", &meta), Err(Error::Overflow));
        assert_eq!(sup.finished.get(), Some(Err(Error::Overflow)));
        // Everything is torn down; further data goes nowhere.
        assert_eq!(source.xfer.deliver_raw(b"late"), Err(Error::BrokenPipe));
    }
}
