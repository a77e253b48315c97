#![forbid(unsafe_code)]

//! End-to-end controller scenario on a tokio `LocalSet`.
//!
//! A folder browser re-initializes whenever the user picks another folder.
//! Each pick renews the controller's scope; the listing of a superseded
//! folder must never reach readers, and its deferred cleanup must run.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use restate::prelude::*;
use tokio::task::{JoinHandle, LocalSet};

// ── Collaborators ──────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum ScanError {
    #[error("scan cancelled")]
    Closed(#[from] Closed),
    #[error("listing unavailable for {0}")]
    Unavailable(String),
}

/// Stand-in for a filesystem service: the listing arrives on `listing`.
async fn list_folder(
    signal: &Signal,
    folder: &str,
    listing: oneshot::Receiver<Vec<String>>,
) -> Result<Vec<String>, ScanError> {
    signal.check()?;
    let unavailable = || ScanError::Unavailable(folder.to_owned());
    signal
        .try_wrap(async { listing.await.map_err(|_| unavailable()) })
        .await
}

struct FolderController {
    slot: ScopeSlot,
    files: Rc<Restate<Vec<String>>>,
    released: Rc<RefCell<Vec<String>>>,
}

impl FolderController {
    fn new() -> Self {
        Self {
            slot: ScopeSlot::new(),
            files: Rc::new(Restate::new(Vec::new())),
            released: Rc::default(),
        }
    }

    fn files(&self) -> State<Vec<String>> {
        self.files.state()
    }

    /// Start scanning `folder`, superseding any scan in flight.
    fn open(
        &mut self,
        folder: &str,
        listing: oneshot::Receiver<Vec<String>>,
    ) -> JoinHandle<Result<(), ScanError>> {
        let signal = self.slot.renew();
        let released = Rc::clone(&self.released);
        let name = folder.to_owned();
        let _cleanup = signal.defer(move || {
            released.borrow_mut().push(name);
            Ok::<_, ScanError>(())
        });

        let files = Rc::clone(&self.files);
        let folder = folder.to_owned();
        tokio::task::spawn_local(async move {
            let listing = list_folder(&signal, &folder, listing).await?;
            signal.check()?;
            files.set(listing).await;
            Ok(())
        })
    }

    fn dispose(&mut self) {
        self.slot.close();
    }
}

/// Let every woken local task run.
async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

fn listing(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

// ── Scenarios ──────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn superseded_scan_never_reaches_readers() {
    LocalSet::new()
        .run_until(async {
            let mut controller = FolderController::new();
            let seen = Rc::new(RefCell::new(Vec::new()));

            let observer_scope = CancellationScope::new();
            let sink = Rc::clone(&seen);
            let observer = tokio::task::spawn_local(controller.files().for_each(
                move |files| {
                    sink.borrow_mut().push(files);
                    async {}
                },
                ForEachOptions::new().with_signal(observer_scope.signal()),
            ));
            settle().await;

            let (holidays_tx, holidays_rx) = oneshot::channel();
            let holidays = controller.open("holidays", holidays_rx);
            let (work_tx, work_rx) = oneshot::channel();
            let work = controller.open("work", work_rx);

            // The first scan's scope closed when the second one started.
            let _ = holidays_tx.send(listing(&["beach.jpg"]));
            let _ = work_tx.send(listing(&["invoice.pdf", "slides.key"]));

            let superseded = holidays.await.expect("holidays task panicked");
            assert!(matches!(superseded, Err(ScanError::Closed(_))));
            work.await.expect("work task panicked").expect("work scan failed");

            assert_eq!(controller.files().current(), listing(&["invoice.pdf", "slides.key"]));
            assert_eq!(*controller.released.borrow(), vec![String::from("holidays")]);

            settle().await;
            observer_scope.close();
            observer.await.expect("observer panicked");

            let seen = seen.borrow();
            assert!(seen.iter().all(|files| !files.contains(&String::from("beach.jpg"))));
            assert_eq!(seen.last(), Some(&listing(&["invoice.pdf", "slides.key"])));
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn dispose_cancels_scan_and_runs_cleanup() {
    LocalSet::new()
        .run_until(async {
            let mut controller = FolderController::new();
            let (_tx, rx) = oneshot::channel();
            let scan = controller.open("camera", rx);
            settle().await;

            controller.dispose();
            let outcome = scan.await.expect("scan task panicked");
            let err = outcome.expect_err("disposed scan must not succeed");
            assert!(Closed::is_closed_error(&err));
            assert_eq!(*controller.released.borrow(), vec![String::from("camera")]);
            assert!(controller.files().current().is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn service_failure_is_not_a_close() {
    LocalSet::new()
        .run_until(async {
            let mut controller = FolderController::new();
            let (tx, rx) = oneshot::channel::<Vec<String>>();
            let scan = controller.open("usb", rx);
            drop(tx);

            let err = scan.await.expect("scan task panicked").expect_err("listing was dropped");
            assert!(!Closed::is_closed_error(&err));
            assert_eq!(err.to_string(), "listing unavailable for usb");
            assert!(controller.released.borrow().is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn readers_iterate_until_controller_is_dropped() {
    LocalSet::new()
        .run_until(async {
            let mut controller = FolderController::new();
            let files = controller.files();
            let reader = tokio::task::spawn_local(async move {
                use futures::StreamExt;
                let mut values = files.iter();
                let mut sizes = Vec::new();
                while let Some(files) = values.next().await {
                    sizes.push(files.len());
                }
                (sizes, values.final_value().map(Vec::len))
            });
            settle().await;

            let (tx, rx) = oneshot::channel();
            let scan = controller.open("music", rx);
            let _ = tx.send(listing(&["a.flac", "b.flac", "c.flac"]));
            scan.await.expect("scan task panicked").expect("scan failed");

            drop(controller);
            let (sizes, final_len) = reader.await.expect("reader panicked");
            assert_eq!(sizes.first(), Some(&0));
            assert_eq!(sizes.last(), Some(&3));
            assert_eq!(final_len, Some(3));
        })
        .await;
}
