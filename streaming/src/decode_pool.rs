//! Threads that read and decode files off the worker thread.
//!
//! The worker hands requests over a channel and polls for finished images
//! once per pass. Results come back in completion order, not request order.

use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use texstream_core::CodecRegistry;
use texstream_core::profiling::{profile_scope, set_thread_name};
use texstream_vfs::ResourceGroups;

use crate::error::{LoadError, StreamingError};
use crate::queue::LoadRequest;
use crate::worker::{LoadedImage, Shared, load_image};

pub(crate) struct DecodeResult {
    pub request: LoadRequest,
    pub outcome: Result<LoadedImage, LoadError>,
}

pub(crate) struct DecodePool {
    jobs: Option<mpsc::Sender<LoadRequest>>,
    results: mpsc::Receiver<DecodeResult>,
    threads: Vec<JoinHandle<()>>,
}

impl DecodePool {
    /// Spawn `threads` decoders. `wake` is signaled after every result.
    pub fn new(
        threads: usize,
        resources: ResourceGroups,
        codecs: Arc<CodecRegistry>,
        wake: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Self, StreamingError> {
        let (job_tx, job_rx) = mpsc::channel::<LoadRequest>();
        let (result_tx, result_rx) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let resources = resources.clone();
            let codecs = codecs.clone();
            let wake = wake.clone();
            let handle = std::thread::Builder::new()
                .name(format!("texstream-decode-{index}"))
                .spawn(move || {
                    set_thread_name!("texstream decode");
                    loop {
                        let request = match jobs.lock().recv() {
                            Ok(request) => request,
                            Err(_) => break,
                        };
                        let outcome = {
                            profile_scope!("decode");
                            load_image(&resources, &codecs, &request)
                        };
                        if results.send(DecodeResult { request, outcome }).is_err() {
                            break;
                        }
                        wake();
                    }
                })?;
            handles.push(handle);
        }
        log::debug!("Started {threads} decode threads");

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            threads: handles,
        })
    }

    pub fn submit(&self, request: LoadRequest) {
        if let Some(jobs) = &self.jobs
            && jobs.send(request).is_err()
        {
            log::error!("Decode threads are gone; dropping request");
        }
    }

    /// Results finished since the last poll.
    pub fn poll_results(&self) -> Vec<DecodeResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.results.try_recv() {
            results.push(result);
        }
        results
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        self.jobs = None;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("A decode thread panicked");
            }
        }
    }
}

/// Waker that signals the worker's event.
pub(crate) fn worker_waker(shared: Arc<Shared>) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || shared.worker_event.wake())
}
